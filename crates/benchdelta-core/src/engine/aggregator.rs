use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use crate::duration::as_secs_f64;
use crate::error::Result;
use crate::record::RequestResult;
use crate::results::{ByteMetrics, LatencyMetrics, MetricsSummary};

// ---------------------------------------------------------------------------
// SummaryAggregator
// ---------------------------------------------------------------------------

/// Folds the records of one recording into a [`MetricsSummary`].
///
/// Every latency is kept so that percentiles are exact (nearest rank) and
/// reproducible. Sealing consumes the aggregator.
pub struct SummaryAggregator {
    requests: u64,
    successes: u64,
    /// All individual latencies, sorted only when sealing.
    latencies: Vec<Duration>,
    total_latency_nanos: i128,
    /// Wide enough that no run of `u64` byte counts can overflow it.
    bytes_in: u128,
    bytes_out: u128,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    status_codes: BTreeMap<String, u64>,
    errors: BTreeSet<String>,
    attack: Option<String>,
}

impl SummaryAggregator {
    pub fn new() -> Self {
        Self {
            requests: 0,
            successes: 0,
            latencies: Vec::new(),
            total_latency_nanos: 0,
            bytes_in: 0,
            bytes_out: 0,
            earliest: None,
            latest: None,
            end: None,
            status_codes: BTreeMap::new(),
            errors: BTreeSet::new(),
            attack: None,
        }
    }

    /// Record a single decoded request.
    pub fn record(&mut self, result: &RequestResult) {
        self.requests = self.requests.saturating_add(1);
        if result.success() {
            self.successes = self.successes.saturating_add(1);
        }
        if self.attack.is_none() && !result.attack.is_empty() {
            self.attack = Some(result.attack.clone());
        }

        self.latencies.push(result.latency);
        self.total_latency_nanos += nanos_i128(result.latency);
        self.bytes_in += u128::from(result.bytes_in);
        self.bytes_out += u128::from(result.bytes_out);

        let ts = result.timestamp;
        if self.earliest.map_or(true, |e| ts < e) {
            self.earliest = Some(ts);
        }
        if self.latest.map_or(true, |l| ts > l) {
            self.latest = Some(ts);
        }
        let end = result.end();
        if self.end.map_or(true, |e| end > e) {
            self.end = Some(end);
        }

        *self
            .status_codes
            .entry(result.code.to_string())
            .or_insert(0) += 1;
        if !result.error.is_empty() && !self.errors.contains(&result.error) {
            self.errors.insert(result.error.clone());
        }
    }

    /// Number of records seen so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// First non-empty attack name seen so far.
    pub fn attack(&self) -> Option<&str> {
        self.attack.as_deref()
    }

    /// Compute the final summary.
    pub fn seal(mut self) -> MetricsSummary {
        if self.requests == 0 {
            return MetricsSummary::default();
        }
        self.latencies.sort_unstable();

        let n = self.requests;
        let duration = match (self.earliest, self.latest) {
            (Some(earliest), Some(latest)) => latest - earliest,
            _ => Duration::zero(),
        };
        let wait = match (self.latest, self.end) {
            (Some(latest), Some(end)) => end - latest,
            _ => Duration::zero(),
        };

        let mut rate = n as f64;
        let mut throughput = self.successes as f64;
        let secs = as_secs_f64(duration);
        if secs > 0.0 {
            rate /= secs;
            throughput /= as_secs_f64(duration + wait);
        }

        let total = duration_from_i128(self.total_latency_nanos);
        let mean = duration_from_i128(self.total_latency_nanos / n as i128);

        let latencies = LatencyMetrics {
            total,
            mean,
            p50: nearest_rank(&self.latencies, 50.0),
            p90: nearest_rank(&self.latencies, 90.0),
            p95: nearest_rank(&self.latencies, 95.0),
            p99: nearest_rank(&self.latencies, 99.0),
            max: self.latencies[self.latencies.len() - 1],
            min: self.latencies[0],
        };

        MetricsSummary {
            requests: n,
            rate,
            throughput,
            duration,
            wait,
            latencies,
            bytes_in: byte_metrics(self.bytes_in, n),
            bytes_out: byte_metrics(self.bytes_out, n),
            success: self.successes as f64 / n as f64,
            earliest: self.earliest,
            latest: self.latest,
            status_codes: self.status_codes,
            errors: self.errors.into_iter().collect(),
        }
    }
}

/// Totals beyond `u64::MAX` are reported as `u64::MAX`; the mean is exact.
fn byte_metrics(total: u128, requests: u64) -> ByteMetrics {
    ByteMetrics {
        total: u64::try_from(total).unwrap_or(u64::MAX),
        mean: total as f64 / requests as f64,
    }
}

impl Default for SummaryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile of an ascending slice.
///
/// `p` must be in the range (0.0, 100.0]. Returns zero for an empty slice.
pub fn nearest_rank(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::zero();
    }
    let idx = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

fn nanos_i128(d: Duration) -> i128 {
    d.num_seconds() as i128 * 1_000_000_000 + d.subsec_nanos() as i128
}

fn duration_from_i128(nanos: i128) -> Duration {
    let clamped = nanos.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64;
    Duration::nanoseconds(clamped)
}

// ---------------------------------------------------------------------------
// aggregate: one forward pass over a fallible record stream
// ---------------------------------------------------------------------------

/// Result of aggregating one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecording {
    /// First non-empty attack name in the recording.
    pub attack: Option<String>,
    pub summary: MetricsSummary,
}

/// Drain `records` into a summary, stopping at the first error.
pub fn aggregate<I>(records: I) -> Result<AggregatedRecording>
where
    I: IntoIterator<Item = Result<RequestResult>>,
{
    let mut aggregator = SummaryAggregator::new();
    for record in records {
        aggregator.record(&record?);
    }
    let attack = aggregator.attack().map(str::to_string);
    Ok(AggregatedRecording {
        attack,
        summary: aggregator.seal(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchdeltaError;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_709_287_200_000 + ms).unwrap()
    }

    fn result(offset_ms: i64, latency_ms: i64, code: u16) -> RequestResult {
        RequestResult {
            attack: "login".to_string(),
            seq: 0,
            code,
            timestamp: at(offset_ms),
            latency: Duration::milliseconds(latency_ms),
            bytes_out: 100,
            bytes_in: 1_000,
            error: if code >= 400 {
                format!("{code} error")
            } else {
                String::new()
            },
        }
    }

    // -----------------------------------------------------------------------
    // record
    // -----------------------------------------------------------------------

    #[test]
    fn record_updates_counts_and_bytes() {
        let mut agg = SummaryAggregator::new();
        agg.record(&result(0, 100, 200));
        agg.record(&result(10, 200, 500));
        agg.record(&result(20, 50, 200));

        assert_eq!(agg.requests(), 3);
        assert_eq!(agg.successes, 2);
        assert_eq!(agg.bytes_in, 3_000);
        assert_eq!(agg.bytes_out, 300);
        assert_eq!(agg.total_latency_nanos, 350_000_000);
    }

    #[test]
    fn record_keeps_first_non_empty_attack() {
        let mut agg = SummaryAggregator::new();
        let mut anonymous = result(0, 1, 200);
        anonymous.attack.clear();
        agg.record(&anonymous);
        assert_eq!(agg.attack(), None);

        agg.record(&result(1, 1, 200));
        let mut other = result(2, 1, 200);
        other.attack = "logout".to_string();
        agg.record(&other);
        assert_eq!(agg.attack(), Some("login"));
    }

    #[test]
    fn record_collects_distinct_errors_and_codes() {
        let mut agg = SummaryAggregator::new();
        agg.record(&result(0, 1, 500));
        agg.record(&result(1, 1, 500));
        agg.record(&result(2, 1, 404));
        agg.record(&result(3, 1, 200));

        let s = agg.seal();
        assert_eq!(s.errors, vec!["404 error".to_string(), "500 error".to_string()]);
        assert_eq!(s.status_codes.get("500"), Some(&2));
        assert_eq!(s.status_codes.get("404"), Some(&1));
        assert_eq!(s.status_codes.get("200"), Some(&1));
    }

    // -----------------------------------------------------------------------
    // nearest_rank
    // -----------------------------------------------------------------------

    #[test]
    fn nearest_rank_empty_returns_zero() {
        assert_eq!(nearest_rank(&[], 50.0), Duration::zero());
    }

    #[test]
    fn nearest_rank_single_entry_returns_that_value() {
        let one = [Duration::milliseconds(250)];
        assert_eq!(nearest_rank(&one, 50.0), Duration::milliseconds(250));
        assert_eq!(nearest_rank(&one, 99.0), Duration::milliseconds(250));
    }

    #[test]
    fn nearest_rank_multiple_entries_are_correct() {
        let sorted: Vec<Duration> = (1..=10).map(|i| Duration::milliseconds(i * 10)).collect();
        // p50 of 10 values => index ceil(0.5 * 10) - 1 = 4 => 50ms
        assert_eq!(nearest_rank(&sorted, 50.0), Duration::milliseconds(50));
        // p90 => index 8 => 90ms
        assert_eq!(nearest_rank(&sorted, 90.0), Duration::milliseconds(90));
        // p99 => index ceil(9.9) - 1 = 9 => 100ms
        assert_eq!(nearest_rank(&sorted, 99.0), Duration::milliseconds(100));
    }

    // -----------------------------------------------------------------------
    // seal
    // -----------------------------------------------------------------------

    #[test]
    fn seal_empty_aggregator_is_zero_summary() {
        let s = SummaryAggregator::new().seal();
        assert_eq!(s, MetricsSummary::default());
        assert_eq!(s.success, 0.0);
        assert!(!s.success.is_nan());
    }

    #[test]
    fn seal_calculates_latency_statistics() {
        let mut agg = SummaryAggregator::new();
        for (i, ms) in [300, 100, 200].into_iter().enumerate() {
            agg.record(&result(i as i64 * 1_000, ms, 200));
        }
        let s = agg.seal();

        assert_eq!(s.requests, 3);
        assert_eq!(s.latencies.min, Duration::milliseconds(100));
        assert_eq!(s.latencies.max, Duration::milliseconds(300));
        assert_eq!(s.latencies.mean, Duration::milliseconds(200));
        assert_eq!(s.latencies.total, Duration::milliseconds(600));
        assert_eq!(s.latencies.p50, Duration::milliseconds(200));
        assert_eq!(s.latencies.p99, Duration::milliseconds(300));
    }

    #[test]
    fn seal_computes_rate_throughput_and_wait() {
        let mut agg = SummaryAggregator::new();
        // Starts at 0s, 1s, 2s; the last one takes 2s to answer.
        agg.record(&result(0, 100, 200));
        agg.record(&result(1_000, 100, 500));
        agg.record(&result(2_000, 2_000, 200));
        let s = agg.seal();

        assert_eq!(s.duration, Duration::seconds(2));
        assert_eq!(s.wait, Duration::seconds(2));
        assert!((s.rate - 1.5).abs() < 1e-9);
        // 2 successes over 4 seconds.
        assert!((s.throughput - 0.5).abs() < 1e-9);
        assert!((s.success - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.earliest, Some(at(0)));
        assert_eq!(s.latest, Some(at(2_000)));
    }

    #[test]
    fn seal_single_request_keeps_raw_counts_as_rates() {
        let mut agg = SummaryAggregator::new();
        agg.record(&result(0, 10, 200));
        let s = agg.seal();
        assert_eq!(s.duration, Duration::zero());
        assert_eq!(s.rate, 1.0);
        assert_eq!(s.throughput, 1.0);
    }

    #[test]
    fn seal_computes_byte_means() {
        let mut agg = SummaryAggregator::new();
        let mut small = result(0, 1, 200);
        small.bytes_in = 10;
        small.bytes_out = 1;
        let mut large = result(1, 1, 200);
        large.bytes_in = 30;
        large.bytes_out = 2;
        agg.record(&small);
        agg.record(&large);
        let s = agg.seal();
        assert_eq!(s.bytes_in.total, 40);
        assert_eq!(s.bytes_in.mean, 20.0);
        assert_eq!(s.bytes_out.total, 3);
        assert_eq!(s.bytes_out.mean, 1.5);
    }

    #[test]
    fn seal_huge_byte_counts_saturate_total_and_keep_mean() {
        let mut agg = SummaryAggregator::new();
        for offset in 0..2 {
            let mut big = result(offset, 1, 200);
            big.bytes_out = u64::MAX;
            big.bytes_in = u64::MAX;
            agg.record(&big);
        }
        let s = agg.seal();
        assert_eq!(s.bytes_out.total, u64::MAX);
        assert_eq!(s.bytes_in.total, u64::MAX);
        assert_eq!(s.bytes_out.mean, u64::MAX as f64);
    }

    #[test]
    fn percentiles_are_not_affected_by_insertion_order() {
        let mut ordered = SummaryAggregator::new();
        let mut reversed = SummaryAggregator::new();
        for (i, ms) in [10, 50, 100, 200, 500].into_iter().enumerate() {
            ordered.record(&result(i as i64, ms, 200));
        }
        for (i, ms) in [500, 200, 100, 50, 10].into_iter().enumerate() {
            reversed.record(&result(i as i64, ms, 200));
        }
        let (a, b) = (ordered.seal(), reversed.seal());
        assert_eq!(a.latencies, b.latencies);
    }

    // -----------------------------------------------------------------------
    // aggregate
    // -----------------------------------------------------------------------

    #[test]
    fn aggregate_returns_attack_and_summary() {
        let records = vec![Ok(result(0, 10, 200)), Ok(result(5, 20, 200))];
        let out = aggregate(records).expect("aggregation should succeed");
        assert_eq!(out.attack.as_deref(), Some("login"));
        assert_eq!(out.summary.requests, 2);
    }

    #[test]
    fn aggregate_stops_at_first_error() {
        let records = vec![
            Ok(result(0, 10, 200)),
            Err(BenchdeltaError::Decode {
                path: PathBuf::from("x.json"),
                record: 2,
                message: "bad".to_string(),
            }),
            Ok(result(5, 20, 200)),
        ];
        let err = aggregate(records).expect_err("aggregation should fail");
        assert!(matches!(err, BenchdeltaError::Decode { record: 2, .. }));
    }

    #[test]
    fn aggregate_empty_stream() {
        let out = aggregate(Vec::new()).unwrap();
        assert_eq!(out.attack, None);
        assert_eq!(out.summary.requests, 0);
    }
}
