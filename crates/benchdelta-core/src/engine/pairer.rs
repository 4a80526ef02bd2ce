use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::engine::aggregator::{aggregate, AggregatedRecording};
use crate::error::{BenchdeltaError, Result};
use crate::record::Recording;
use crate::results::{RunTotals, ScenarioPair};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What to do with a recording that exists in only one of the two directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Skip it and compare what can be compared.
    #[default]
    BestEffort,
    /// Fail the run.
    Strict,
}

/// Which run a recording belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Before,
    After,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Before => "before",
            Side::After => "after",
        };
        write!(f, "{s}")
    }
}

/// How [`pair_scenarios`] matches and reads recordings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub policy: PairingPolicy,
    /// Maximum number of recordings aggregated at the same time.
    pub jobs: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            policy: PairingPolicy::default(),
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Emitted once per recording after it has been fully aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ScanProgress {
    pub file: String,
    pub side: Side,
    /// Size of the recording on disk.
    pub bytes: u64,
    /// Requests decoded from the recording.
    pub requests: u64,
}

// ---------------------------------------------------------------------------
// Directory listing and matching
// ---------------------------------------------------------------------------

/// Names of the regular files directly inside `dir`.
///
/// Subdirectories are skipped, as are names that are not valid UTF-8.
pub fn list_recordings(dir: &Path) -> Result<BTreeSet<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| BenchdeltaError::file(dir, e))?;
    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| BenchdeltaError::file(dir, e))?;
        let path = entry.path();
        let metadata = std::fs::metadata(&path).map_err(|e| BenchdeltaError::file(&path, e))?;
        if !metadata.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => {
                names.insert(name);
            }
            Err(raw) => {
                tracing::warn!(name = ?raw, dir = %dir.display(), "skipping non UTF-8 file name");
            }
        }
    }
    Ok(names)
}

/// Filenames present on both sides, in filename order.
pub fn common_filenames(
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
    policy: PairingPolicy,
) -> Result<Vec<String>> {
    let unmatched: Vec<(&String, Side)> = before
        .difference(after)
        .map(|name| (name, Side::Before))
        .chain(after.difference(before).map(|name| (name, Side::After)))
        .collect();

    if !unmatched.is_empty() {
        match policy {
            PairingPolicy::BestEffort => {
                for (name, side) in &unmatched {
                    tracing::debug!(file = %name, %side, "no counterpart, skipping");
                }
            }
            PairingPolicy::Strict => {
                let listed = unmatched
                    .iter()
                    .map(|(name, side)| format!("{name} (only {side})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(BenchdeltaError::Config(format!(
                    "recordings without a counterpart: {listed}"
                )));
            }
        }
    }

    Ok(before.intersection(after).cloned().collect())
}

// ---------------------------------------------------------------------------
// pair_scenarios
// ---------------------------------------------------------------------------

struct ScannedFile {
    index: usize,
    side: Side,
    recording: AggregatedRecording,
    totals: RunTotals,
}

/// Aggregate one recording. Decoding stops early once `cancelled` is set.
fn scan_file(path: &Path, cancelled: &AtomicBool) -> Result<(AggregatedRecording, RunTotals)> {
    let recording = Recording::open(path)?;
    let size = recording.size();
    let format = recording.format();
    let aggregated = aggregate(recording.take_while(|_| !cancelled.load(Ordering::Relaxed)))?;
    if cancelled.load(Ordering::Relaxed) {
        return Err(BenchdeltaError::Internal(format!(
            "scan of {} cancelled",
            path.display()
        )));
    }
    let requests = aggregated.summary.requests;
    if requests == 0 {
        tracing::warn!(path = %path.display(), "recording contains no requests");
    } else {
        tracing::debug!(path = %path.display(), ?format, requests, size, "recording aggregated");
    }
    Ok((aggregated, RunTotals::for_file(size, requests)))
}

/// Aggregate every recording present in both directories and pair them up.
///
/// Recordings are aggregated on the blocking pool, at most `options.jobs` at
/// a time. Nothing is returned until every recording is done; the first
/// failure cancels the outstanding work and is returned instead. Pairs come
/// back sorted by scenario name.
pub async fn pair_scenarios(
    before_dir: &Path,
    after_dir: &Path,
    options: &ScanOptions,
    progress: Option<mpsc::UnboundedSender<ScanProgress>>,
) -> Result<(Vec<ScenarioPair>, RunTotals)> {
    let before = list_recordings(before_dir)?;
    let after = list_recordings(after_dir)?;
    let files = common_filenames(&before, &after, options.policy)?;
    tracing::debug!(
        before = before.len(),
        after = after.len(),
        paired = files.len(),
        "matched recordings"
    );

    let semaphore = Arc::new(Semaphore::new(options.jobs.max(1)));
    // Blocking scans cannot be aborted; they poll this flag instead.
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut join_set: JoinSet<Result<ScannedFile>> = JoinSet::new();

    for (index, file) in files.iter().enumerate() {
        for (side, dir) in [(Side::Before, before_dir), (Side::After, after_dir)] {
            let path: PathBuf = dir.join(file);
            let file = file.clone();
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let cancelled = Arc::clone(&cancelled);

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| BenchdeltaError::Internal(e.to_string()))?;
                let (recording, totals) = tokio::task::spawn_blocking(move || scan_file(&path, &cancelled))
                    .await
                    .map_err(|e| BenchdeltaError::Internal(format!("scan task failed: {e}")))??;

                if let Some(tx) = &progress {
                    // Receiver may be gone; progress is best effort.
                    let _ = tx.send(ScanProgress {
                        file,
                        side,
                        bytes: totals.dataset_bytes,
                        requests: totals.requests,
                    });
                }
                Ok(ScannedFile {
                    index,
                    side,
                    recording,
                    totals,
                })
            });
        }
    }

    // Barrier: collect every file before anything is paired.
    let mut slots: Vec<(Option<AggregatedRecording>, Option<AggregatedRecording>)> =
        std::iter::repeat_with(|| (None, None))
            .take(files.len())
            .collect();
    let mut per_file = Vec::with_capacity(files.len() * 2);

    while let Some(joined) = join_set.join_next().await {
        let scanned = match joined {
            Ok(Ok(scanned)) => scanned,
            Ok(Err(e)) => {
                cancelled.store(true, Ordering::Relaxed);
                join_set.abort_all();
                return Err(e);
            }
            Err(e) => {
                cancelled.store(true, Ordering::Relaxed);
                join_set.abort_all();
                return Err(BenchdeltaError::Internal(format!("scan task failed: {e}")));
            }
        };
        per_file.push(scanned.totals);
        let slot = &mut slots[scanned.index];
        match scanned.side {
            Side::Before => slot.0 = Some(scanned.recording),
            Side::After => slot.1 = Some(scanned.recording),
        }
    }

    let totals: RunTotals = per_file.into_iter().sum();

    let mut pairs = Vec::with_capacity(files.len());
    for (file, slot) in files.into_iter().zip(slots) {
        let (Some(before), Some(after)) = slot else {
            return Err(BenchdeltaError::Internal(format!(
                "recording {file} was not aggregated on both sides"
            )));
        };
        let name = before
            .attack
            .clone()
            .or_else(|| after.attack.clone())
            .unwrap_or_else(|| file.clone());
        pairs.push(ScenarioPair {
            name,
            file,
            before: before.summary,
            after: after.summary,
        });
    }
    pairs.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::info!(
        scenarios = pairs.len(),
        files = totals.files,
        requests = totals.requests,
        dataset_bytes = totals.dataset_bytes,
        "scan complete"
    );
    Ok((pairs, totals))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
