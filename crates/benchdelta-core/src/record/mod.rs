pub mod decode;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::serde_nanos;
use crate::error::{BenchdeltaError, Result};

pub use decode::{detect_format, Records, RecordFormat};

/// A single request observed by the load tester.
///
/// Field names follow the load tester's JSON result encoding; fields it writes
/// that the comparison does not need (body, method, url, headers) are ignored
/// on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestResult {
    #[serde(default)]
    pub attack: String,
    #[serde(default)]
    pub seq: u64,
    pub code: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "serde_nanos")]
    pub latency: Duration,
    #[serde(default)]
    pub bytes_out: u64,
    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub error: String,
}

impl RequestResult {
    /// Requests with a 2xx or 3xx status count as successful.
    pub fn success(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// When the response finished arriving.
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp
            .checked_add_signed(self.latency)
            .unwrap_or(self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Recording: one result file on disk
// ---------------------------------------------------------------------------

/// An opened result file: its size on disk plus a lazy stream of records.
///
/// Iterating yields `Ok(record)` until the natural end of the file; any
/// malformed record yields a single `Err` and the iterator is then exhausted.
pub struct Recording {
    path: PathBuf,
    size: u64,
    format: RecordFormat,
    records: Records,
    decoded: u64,
    failed: bool,
}

impl Recording {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| BenchdeltaError::file(&path, e))?;
        let size = file
            .metadata()
            .map_err(|e| BenchdeltaError::file(&path, e))?
            .len();

        let mut reader = BufReader::new(file);
        let format = detect_format(&mut reader).map_err(|e| match e {
            decode::DetectError::Io(source) => BenchdeltaError::file(&path, source),
            decode::DetectError::Unrecognised(byte) => BenchdeltaError::Decode {
                path: path.clone(),
                record: 1,
                message: format!(
                    "unrecognised record encoding (leading byte 0x{byte:02x}); \
                     expected JSON or CSV results"
                ),
            },
        })?;
        tracing::debug!(path = %path.display(), ?format, size, "opened recording");

        Ok(Self {
            records: Records::new(format, reader),
            path,
            size,
            format,
            decoded: 0,
            failed: false,
        })
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }
}

impl Iterator for Recording {
    type Item = Result<RequestResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.records.next()? {
            Ok(record) => {
                self.decoded += 1;
                Some(Ok(record))
            }
            Err(message) => {
                self.failed = true;
                Some(Err(BenchdeltaError::Decode {
                    path: self.path.clone(),
                    record: self.decoded + 1,
                    message,
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
