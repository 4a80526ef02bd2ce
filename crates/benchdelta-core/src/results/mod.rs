use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::serde_nanos;

/// Latency statistics for one scenario side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LatencyMetrics {
    #[serde(with = "serde_nanos")]
    pub total: Duration,
    #[serde(with = "serde_nanos")]
    pub mean: Duration,
    #[serde(with = "serde_nanos")]
    pub p50: Duration,
    #[serde(with = "serde_nanos")]
    pub p90: Duration,
    #[serde(with = "serde_nanos")]
    pub p95: Duration,
    #[serde(with = "serde_nanos")]
    pub p99: Duration,
    #[serde(with = "serde_nanos")]
    pub max: Duration,
    #[serde(with = "serde_nanos")]
    pub min: Duration,
}

impl Default for LatencyMetrics {
    fn default() -> Self {
        Self {
            total: Duration::zero(),
            mean: Duration::zero(),
            p50: Duration::zero(),
            p90: Duration::zero(),
            p95: Duration::zero(),
            p99: Duration::zero(),
            max: Duration::zero(),
            min: Duration::zero(),
        }
    }
}

/// Byte counters for one direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ByteMetrics {
    pub total: u64,
    pub mean: f64,
}

/// Aggregated statistics of one recording.
///
/// Produced once by [`crate::engine::SummaryAggregator::seal`]; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsSummary {
    /// Number of recorded requests.
    pub requests: u64,
    /// Requests per second between the first and last request start.
    pub rate: f64,
    /// Successful requests per second, including the wait for the last response.
    pub throughput: f64,
    /// Span between the earliest and latest request start.
    #[serde(with = "serde_nanos")]
    pub duration: Duration,
    /// Time between the latest request start and the last response end.
    #[serde(with = "serde_nanos")]
    pub wait: Duration,
    pub latencies: LatencyMetrics,
    pub bytes_in: ByteMetrics,
    pub bytes_out: ByteMetrics,
    /// Ratio of successful requests, in `[0, 1]`.
    pub success: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<DateTime<Utc>>,
    /// Request count per status code (`"0"` for transport failures).
    #[serde(default)]
    pub status_codes: BTreeMap<String, u64>,
    /// Distinct error messages, sorted.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            requests: 0,
            rate: 0.0,
            throughput: 0.0,
            duration: Duration::zero(),
            wait: Duration::zero(),
            latencies: LatencyMetrics::default(),
            bytes_in: ByteMetrics::default(),
            bytes_out: ByteMetrics::default(),
            success: 0.0,
            earliest: None,
            latest: None,
            status_codes: BTreeMap::new(),
            errors: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScenarioPair: before/after summaries of one scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioPair {
    pub name: String,
    /// File the two summaries were read from (same name on both sides).
    pub file: String,
    pub before: MetricsSummary,
    pub after: MetricsSummary,
}

// ---------------------------------------------------------------------------
// RunTotals: run-level counters
// ---------------------------------------------------------------------------

/// Totals over every file consumed by a run. Each file contributes its own
/// value and the values are merged once all files are done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunTotals {
    /// Bytes of recording data read.
    pub dataset_bytes: u64,
    /// Requests decoded across all recordings.
    pub requests: u64,
    /// Recordings read (two per paired scenario).
    pub files: u64,
}

impl RunTotals {
    pub fn for_file(dataset_bytes: u64, requests: u64) -> Self {
        Self {
            dataset_bytes,
            requests,
            files: 1,
        }
    }

    /// Field-wise sum, saturating at `u64::MAX`.
    pub fn merge(self, other: RunTotals) -> RunTotals {
        RunTotals {
            dataset_bytes: self.dataset_bytes.saturating_add(other.dataset_bytes),
            requests: self.requests.saturating_add(other.requests),
            files: self.files.saturating_add(other.files),
        }
    }
}

impl std::iter::Sum for RunTotals {
    fn sum<I: Iterator<Item = RunTotals>>(iter: I) -> Self {
        iter.fold(RunTotals::default(), RunTotals::merge)
    }
}
