use std::io::BufRead;

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::RequestResult;

/// On-disk encodings of a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// One JSON object per record.
    Json,
    /// Headerless CSV: `timestamp_ns,code,latency_ns,bytes_out,bytes_in,error,body,attack,seq,...`
    Csv,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognised leading byte 0x{0:02x}")]
    Unrecognised(u8),
}

/// Look at the first non-whitespace byte to pick the encoding.
///
/// Leading whitespace is consumed; nothing else is. An empty (or blank) input
/// is reported as JSON, which decodes to zero records.
pub fn detect_format<R: BufRead>(reader: &mut R) -> Result<RecordFormat, DetectError> {
    loop {
        let (first, available) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(RecordFormat::Json);
            }
            let first = buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .map(|i| (i, buf[i]));
            (first, buf.len())
        };
        match first {
            Some((skip, byte)) => {
                reader.consume(skip);
                return match byte {
                    b'{' => Ok(RecordFormat::Json),
                    b'0'..=b'9' | b'-' => Ok(RecordFormat::Csv),
                    other => Err(DetectError::Unrecognised(other)),
                };
            }
            None => reader.consume(available),
        }
    }
}

/// Lazy record stream over a reader. Errors are plain messages; the caller
/// attaches the path and record index.
pub struct Records {
    inner: Box<dyn Iterator<Item = Result<RequestResult, String>> + Send>,
}

impl Records {
    pub fn new<R>(format: RecordFormat, reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let inner: Box<dyn Iterator<Item = Result<RequestResult, String>> + Send> = match format
        {
            RecordFormat::Json => Box::new(
                serde_json::Deserializer::from_reader(reader)
                    .into_iter::<RequestResult>()
                    .map(|item| item.map_err(|e| e.to_string())),
            ),
            RecordFormat::Csv => Box::new(
                csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(reader)
                    .into_records()
                    .map(|item| {
                        item.map_err(|e| e.to_string())
                            .and_then(|record| parse_csv_record(&record))
                    }),
            ),
        };
        Self { inner }
    }
}

impl Iterator for Records {
    type Item = Result<RequestResult, String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

fn parse_csv_record(record: &csv::StringRecord) -> Result<RequestResult, String> {
    fn column<'r>(record: &'r csv::StringRecord, index: usize, name: &str) -> Result<&'r str, String> {
        record
            .get(index)
            .map(str::trim)
            .ok_or_else(|| format!("missing {name} column"))
    }
    fn number<T: std::str::FromStr>(text: &str, name: &str) -> Result<T, String>
    where
        T::Err: std::fmt::Display,
    {
        text.parse()
            .map_err(|e| format!("invalid {name} {text:?}: {e}"))
    }

    let timestamp_ns: i64 = number(column(record, 0, "timestamp")?, "timestamp")?;
    let code: u16 = number(column(record, 1, "code")?, "code")?;
    let latency_ns: i64 = number(column(record, 2, "latency")?, "latency")?;
    let bytes_out: u64 = number(column(record, 3, "bytes_out")?, "bytes_out")?;
    let bytes_in: u64 = number(column(record, 4, "bytes_in")?, "bytes_in")?;
    let error = record.get(5).unwrap_or_default().to_string();
    let attack = record.get(7).unwrap_or_default().to_string();
    let seq = match record.get(8).map(str::trim) {
        Some(text) if !text.is_empty() => number(text, "seq")?,
        _ => 0,
    };

    Ok(RequestResult {
        attack,
        seq,
        code,
        timestamp: Utc.timestamp_nanos(timestamp_ns),
        latency: Duration::nanoseconds(latency_ns),
        bytes_out,
        bytes_in,
        error,
    })
}
