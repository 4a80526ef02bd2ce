use std::fmt;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::duration::{as_nanos_f64, serde_nanos, serde_text, smart_format};
use crate::error::{BenchdeltaError, Result};
use crate::results::{MetricsSummary, RunTotals, ScenarioPair};

// ---------------------------------------------------------------------------
// Polarity / Classification
// ---------------------------------------------------------------------------

/// Which direction of change is good for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

/// Outcome of comparing one metric between the two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Bit-for-bit identical values.
    Unchanged,
    /// Different, but by less than the margin.
    WithinMargin,
    Improved,
    Regressed,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Unchanged => "unchanged",
            Classification::WithinMargin => "within-margin",
            Classification::Improved => "improved",
            Classification::Regressed => "regressed",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Measure: the numeric kinds a metric can have
// ---------------------------------------------------------------------------

/// Numeric kinds that can be compared.
///
/// Each kind does its own distance arithmetic so durations are compared in
/// nanosecond ticks and counts in integers; only the percentage goes through
/// `f64`.
pub trait Measure: Copy + PartialEq + PartialOrd {
    fn as_f64(self) -> f64;

    fn is_zero(self) -> bool;

    /// `|after - before| < margin`.
    fn within_margin(before: Self, after: Self, margin: Self) -> bool;

    fn into_value(self) -> MetricValue;
}

impl Measure for Duration {
    fn as_f64(self) -> f64 {
        as_nanos_f64(self)
    }

    fn is_zero(self) -> bool {
        self == Duration::zero()
    }

    fn within_margin(before: Self, after: Self, margin: Self) -> bool {
        let (low, high) = if before > after {
            (after, before)
        } else {
            (before, after)
        };
        match high.checked_sub(&low) {
            Some(distance) => distance < margin,
            None => false,
        }
    }

    fn into_value(self) -> MetricValue {
        MetricValue::Duration(self)
    }
}

impl Measure for u64 {
    fn as_f64(self) -> f64 {
        self as f64
    }

    fn is_zero(self) -> bool {
        self == 0
    }

    fn within_margin(before: Self, after: Self, margin: Self) -> bool {
        before.abs_diff(after) < margin
    }

    fn into_value(self) -> MetricValue {
        MetricValue::Count(self)
    }
}

impl Measure for f64 {
    fn as_f64(self) -> f64 {
        self
    }

    fn is_zero(self) -> bool {
        self == 0.0
    }

    fn within_margin(before: Self, after: Self, margin: Self) -> bool {
        (after - before).abs() < margin
    }

    fn into_value(self) -> MetricValue {
        MetricValue::Ratio(self)
    }
}

/// Relative change from `before` to `after`, in percent. Zero when `before`
/// is zero.
pub fn percentage_increase<M: Measure>(before: M, after: M) -> f64 {
    if before.is_zero() {
        return 0.0;
    }
    let before = before.as_f64();
    (after.as_f64() - before) / before * 100.0
}

/// Classify the change from `before` to `after`.
pub fn classify<M: Measure>(before: M, after: M, margin: M, polarity: Polarity) -> Classification {
    if before == after {
        return Classification::Unchanged;
    }
    if M::within_margin(before, after, margin) {
        return Classification::WithinMargin;
    }
    let increased = after > before;
    match (polarity, increased) {
        (Polarity::HigherIsBetter, true) | (Polarity::LowerIsBetter, false) => {
            Classification::Improved
        }
        _ => Classification::Regressed,
    }
}

// ---------------------------------------------------------------------------
// Metric / MetricValue
// ---------------------------------------------------------------------------

/// A compared quantity of a scenario summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Requests,
    Rate,
    Throughput,
    LatencyMean,
    LatencyP50,
    LatencyP95,
    LatencyP99,
    LatencyMax,
    BytesOutMean,
    BytesInMean,
    /// Success ratio, compared in percent.
    Success,
}

impl Metric {
    /// Every metric, in report column order.
    pub const ALL: [Metric; 11] = [
        Metric::Requests,
        Metric::Rate,
        Metric::Throughput,
        Metric::LatencyMean,
        Metric::LatencyP50,
        Metric::LatencyP95,
        Metric::LatencyP99,
        Metric::LatencyMax,
        Metric::BytesOutMean,
        Metric::BytesInMean,
        Metric::Success,
    ];

    /// Which direction of change counts as an improvement.
    pub fn polarity(self) -> Polarity {
        match self {
            Metric::Requests
            | Metric::Rate
            | Metric::Throughput
            | Metric::BytesOutMean
            | Metric::BytesInMean
            | Metric::Success => Polarity::HigherIsBetter,
            Metric::LatencyMean
            | Metric::LatencyP50
            | Metric::LatencyP95
            | Metric::LatencyP99
            | Metric::LatencyMax => Polarity::LowerIsBetter,
        }
    }

    /// Column label used by the tabular and matrix reports.
    pub fn label(self) -> &'static str {
        match self {
            Metric::Requests => "Total requests",
            Metric::Rate => "Request rate",
            Metric::Throughput => "Throughput",
            Metric::LatencyMean => "Mean",
            Metric::LatencyP50 => "P50",
            Metric::LatencyP95 => "P95",
            Metric::LatencyP99 => "P99",
            Metric::LatencyMax => "Max",
            Metric::BytesOutMean => "Mean bytes sent",
            Metric::BytesInMean => "Mean bytes received",
            Metric::Success => "Success",
        }
    }
}

/// A metric value tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Duration(#[serde(with = "serde_nanos")] Duration),
    Count(u64),
    Ratio(f64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Duration(d) => d.as_f64(),
            MetricValue::Count(n) => n as f64,
            MetricValue::Ratio(x) => x,
        }
    }

    /// `after - self`, in the same kind. `None` when the kinds differ.
    pub fn difference(self, after: MetricValue) -> Option<MetricValue> {
        match (self, after) {
            (MetricValue::Duration(b), MetricValue::Duration(a)) => {
                a.checked_sub(&b).map(MetricValue::Duration)
            }
            (MetricValue::Count(b), MetricValue::Count(a)) => {
                // Counts may shrink; the difference is carried as a float.
                Some(MetricValue::Ratio(a as f64 - b as f64))
            }
            (MetricValue::Ratio(b), MetricValue::Ratio(a)) => Some(MetricValue::Ratio(a - b)),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Duration(d) => f.write_str(&smart_format(*d)),
            MetricValue::Count(n) => write!(f, "{n}"),
            MetricValue::Ratio(x) => write!(f, "{x}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Margins
// ---------------------------------------------------------------------------

/// Per-metric tolerance, each in the unit of the metric it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct Margins {
    pub requests: u64,
    pub rate: f64,
    pub throughput: f64,
    pub bytes_out_mean: f64,
    pub bytes_in_mean: f64,
    /// Percentage points.
    pub success: f64,
    /// Applies to mean, P50, P95, P99 and max latency.
    #[serde(with = "serde_text")]
    pub latency: Duration,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            requests: 0,
            rate: 0.0,
            throughput: 0.0,
            bytes_out_mean: 0.0,
            bytes_in_mean: 0.0,
            success: 0.0,
            latency: Duration::zero(),
        }
    }
}

impl Margins {
    /// Read margins from a JSON file. Missing keys default to zero.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BenchdeltaError::file(path, e))?;
        let margins: Margins = serde_json::from_str(&text).map_err(|e| {
            BenchdeltaError::Config(format!("invalid margins file {}: {e}", path.display()))
        })?;
        margins.validate()?;
        tracing::debug!(path = %path.display(), ?margins, "loaded margins");
        Ok(margins)
    }

    /// Margins must be finite and not negative.
    pub fn validate(&self) -> Result<()> {
        let floats = [
            ("rate", self.rate),
            ("throughput", self.throughput),
            ("bytes_out_mean", self.bytes_out_mean),
            ("bytes_in_mean", self.bytes_in_mean),
            ("success", self.success),
        ];
        for (name, value) in floats {
            if !value.is_finite() || value < 0.0 {
                return Err(BenchdeltaError::Config(format!(
                    "{name} margin must be a non-negative number, got {value}"
                )));
            }
        }
        if self.latency < Duration::zero() {
            return Err(BenchdeltaError::Config(format!(
                "latency margin must not be negative, got {}",
                smart_format(self.latency)
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Comparison results
// ---------------------------------------------------------------------------

/// One classified metric change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricDelta {
    pub metric: Metric,
    pub before: MetricValue,
    pub after: MetricValue,
    /// Relative change in percent.
    pub percent: f64,
    pub classification: Classification,
}

/// Both summaries of a scenario plus every classified metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioComparison {
    pub name: String,
    pub file: String,
    pub before: MetricsSummary,
    pub after: MetricsSummary,
    /// One entry per [`Metric::ALL`], in that order.
    pub deltas: Vec<MetricDelta>,
}

impl ScenarioComparison {
    pub fn delta(&self, metric: Metric) -> Option<&MetricDelta> {
        self.deltas.iter().find(|d| d.metric == metric)
    }
}

/// Everything a renderer needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Report {
    pub scenarios: Vec<ScenarioComparison>,
    pub totals: RunTotals,
}

impl Report {
    pub fn new(pairs: Vec<ScenarioPair>, totals: RunTotals, margins: &Margins) -> Self {
        Self {
            scenarios: compare_scenarios(pairs, margins),
            totals,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

fn measure_delta<M: Measure>(metric: Metric, before: M, after: M, margin: M) -> MetricDelta {
    MetricDelta {
        metric,
        before: before.into_value(),
        after: after.into_value(),
        percent: percentage_increase(before, after),
        classification: classify(before, after, margin, metric.polarity()),
    }
}

fn compare_metric(
    metric: Metric,
    before: &MetricsSummary,
    after: &MetricsSummary,
    margins: &Margins,
) -> MetricDelta {
    let (b, a) = (&before.latencies, &after.latencies);
    match metric {
        Metric::Requests => measure_delta(metric, before.requests, after.requests, margins.requests),
        Metric::Rate => measure_delta(metric, before.rate, after.rate, margins.rate),
        Metric::Throughput => {
            measure_delta(metric, before.throughput, after.throughput, margins.throughput)
        }
        Metric::LatencyMean => measure_delta(metric, b.mean, a.mean, margins.latency),
        Metric::LatencyP50 => measure_delta(metric, b.p50, a.p50, margins.latency),
        Metric::LatencyP95 => measure_delta(metric, b.p95, a.p95, margins.latency),
        Metric::LatencyP99 => measure_delta(metric, b.p99, a.p99, margins.latency),
        Metric::LatencyMax => measure_delta(metric, b.max, a.max, margins.latency),
        Metric::BytesOutMean => measure_delta(
            metric,
            before.bytes_out.mean,
            after.bytes_out.mean,
            margins.bytes_out_mean,
        ),
        Metric::BytesInMean => measure_delta(
            metric,
            before.bytes_in.mean,
            after.bytes_in.mean,
            margins.bytes_in_mean,
        ),
        Metric::Success => measure_delta(
            metric,
            before.success * 100.0,
            after.success * 100.0,
            margins.success,
        ),
    }
}

/// Classify every metric of one scenario.
pub fn compare_pair(pair: ScenarioPair, margins: &Margins) -> ScenarioComparison {
    let deltas = Metric::ALL
        .iter()
        .map(|&metric| compare_metric(metric, &pair.before, &pair.after, margins))
        .collect();
    ScenarioComparison {
        name: pair.name,
        file: pair.file,
        before: pair.before,
        after: pair.after,
        deltas,
    }
}

/// [`compare_pair`] over a whole run, keeping the order of `pairs`.
pub fn compare_scenarios(pairs: Vec<ScenarioPair>, margins: &Margins) -> Vec<ScenarioComparison> {
    pairs
        .into_iter()
        .map(|pair| compare_pair(pair, margins))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    fn summary(mean_ms: i64, requests: u64, success: f64) -> MetricsSummary {
        let mut s = MetricsSummary::default();
        s.requests = requests;
        s.rate = requests as f64 / 10.0;
        s.throughput = requests as f64 * success / 10.0;
        s.latencies.mean = ms(mean_ms);
        s.latencies.p50 = ms(mean_ms);
        s.latencies.p95 = ms(mean_ms * 2);
        s.latencies.p99 = ms(mean_ms * 3);
        s.latencies.max = ms(mean_ms * 4);
        s.bytes_out.mean = 10.0;
        s.bytes_in.mean = 1_000.0;
        s.success = success;
        s
    }

    fn pair(name: &str, before: MetricsSummary, after: MetricsSummary) -> ScenarioPair {
        ScenarioPair {
            name: name.to_string(),
            file: format!("{name}.json"),
            before,
            after,
        }
    }

    // -----------------------------------------------------------------------
    // percentage_increase
    // -----------------------------------------------------------------------

    #[test]
    fn percentage_increase_zero_before_is_zero() {
        assert_eq!(percentage_increase(0u64, 10u64), 0.0);
        assert_eq!(percentage_increase(0.0, 3.5), 0.0);
        assert_eq!(percentage_increase(Duration::zero(), ms(5)), 0.0);
    }

    #[test]
    fn percentage_increase_signs() {
        assert_eq!(percentage_increase(100u64, 150u64), 50.0);
        assert_eq!(percentage_increase(100u64, 50u64), -50.0);
        let p = percentage_increase(ms(178), ms(142));
        assert!((p - (-20.224719)).abs() < 1e-4);
    }

    // -----------------------------------------------------------------------
    // classify
    // -----------------------------------------------------------------------

    #[test]
    fn classify_equal_values_are_unchanged() {
        assert_eq!(
            classify(ms(5), ms(5), Duration::zero(), Polarity::LowerIsBetter),
            Classification::Unchanged
        );
        assert_eq!(
            classify(7u64, 7u64, 100u64, Polarity::HigherIsBetter),
            Classification::Unchanged
        );
    }

    #[test]
    fn classify_within_margin_is_strict() {
        assert_eq!(
            classify(100u64, 104u64, 5u64, Polarity::HigherIsBetter),
            Classification::WithinMargin
        );
        assert_eq!(
            classify(100u64, 105u64, 5u64, Polarity::HigherIsBetter),
            Classification::Improved
        );
        assert_eq!(
            classify(ms(100), ms(129), ms(30), Polarity::LowerIsBetter),
            Classification::WithinMargin
        );
        assert_eq!(
            classify(ms(100), ms(130), ms(30), Polarity::LowerIsBetter),
            Classification::Regressed
        );
    }

    #[test]
    fn classify_margin_applies_in_both_directions() {
        assert_eq!(
            classify(10.0, 9.5, 1.0, Polarity::HigherIsBetter),
            Classification::WithinMargin
        );
        assert_eq!(
            classify(9u64, 10u64, 2u64, Polarity::HigherIsBetter),
            Classification::WithinMargin
        );
        assert_eq!(
            classify(10u64, 9u64, 2u64, Polarity::HigherIsBetter),
            Classification::WithinMargin
        );
    }

    #[test]
    fn classify_follows_polarity() {
        assert_eq!(
            classify(10.0, 20.0, 0.0, Polarity::HigherIsBetter),
            Classification::Improved
        );
        assert_eq!(
            classify(20.0, 10.0, 0.0, Polarity::HigherIsBetter),
            Classification::Regressed
        );
        assert_eq!(
            classify(ms(20), ms(10), Duration::zero(), Polarity::LowerIsBetter),
            Classification::Improved
        );
        assert_eq!(
            classify(ms(10), ms(20), Duration::zero(), Polarity::LowerIsBetter),
            Classification::Regressed
        );
    }

    #[test]
    fn classify_sub_nanosecond_float_change_is_not_unchanged() {
        assert_eq!(
            classify(1.0, 1.0 + f64::EPSILON, 0.0, Polarity::HigherIsBetter),
            Classification::Improved
        );
    }

    #[test]
    fn classification_display_and_serde() {
        assert_eq!(Classification::WithinMargin.to_string(), "within-margin");
        let json = serde_json::to_string(&Classification::Regressed).unwrap();
        assert_eq!(json, "\"regressed\"");
    }

    // -----------------------------------------------------------------------
    // Metric
    // -----------------------------------------------------------------------

    #[test]
    fn latency_metrics_prefer_lower_values() {
        for metric in Metric::ALL {
            let expected = if metric.label().starts_with('P')
                || metric == Metric::LatencyMean
                || metric == Metric::LatencyMax
            {
                Polarity::LowerIsBetter
            } else {
                Polarity::HigherIsBetter
            };
            assert_eq!(metric.polarity(), expected, "{metric:?}");
        }
    }

    #[test]
    fn metric_value_serializes_with_kind_tag() {
        let json = serde_json::to_value(MetricValue::Duration(ms(3))).unwrap();
        assert_eq!(json["kind"], "duration");
        assert_eq!(json["value"], 3_000_000);
        let json = serde_json::to_value(MetricValue::Count(12)).unwrap();
        assert_eq!(json["kind"], "count");
    }

    #[test]
    fn metric_value_difference_keeps_kind() {
        let diff = MetricValue::Duration(ms(10)).difference(MetricValue::Duration(ms(4)));
        assert_eq!(diff, Some(MetricValue::Duration(ms(-6))));
        let diff = MetricValue::Count(10).difference(MetricValue::Count(4));
        assert_eq!(diff, Some(MetricValue::Ratio(-6.0)));
        assert_eq!(
            MetricValue::Count(1).difference(MetricValue::Ratio(1.0)),
            None
        );
    }

    // -----------------------------------------------------------------------
    // Margins
    // -----------------------------------------------------------------------

    #[test]
    fn margins_default_is_zero() {
        let m = Margins::default();
        assert_eq!(m.requests, 0);
        assert_eq!(m.latency, Duration::zero());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn margins_validate_rejects_negative_and_nan() {
        let mut m = Margins::default();
        m.throughput = -1.0;
        assert!(matches!(m.validate(), Err(BenchdeltaError::Config(_))));

        let mut m = Margins::default();
        m.success = f64::NAN;
        assert!(m.validate().is_err());

        let mut m = Margins::default();
        m.latency = ms(-1);
        assert!(m.validate().unwrap_err().to_string().contains("latency"));
    }

    #[test]
    fn margins_load_reads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"requests": 20, "latency": "30ms", "success": 0.5}}"#).unwrap();
        let m = Margins::load(file.path()).unwrap();
        assert_eq!(m.requests, 20);
        assert_eq!(m.latency, ms(30));
        assert_eq!(m.success, 0.5);
        assert_eq!(m.throughput, 0.0);
    }

    #[test]
    fn margins_load_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"latncy": "30ms"}}"#).unwrap();
        let err = Margins::load(file.path()).unwrap_err();
        assert!(matches!(err, BenchdeltaError::Config(_)));
    }

    #[test]
    fn margins_round_trip_latency_as_text() {
        let mut m = Margins::default();
        m.latency = ms(250);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["latency"], "250ms");
    }

    // -----------------------------------------------------------------------
    // compare_pair / Report
    // -----------------------------------------------------------------------

    #[test]
    fn compare_pair_classifies_every_metric_in_order() {
        let cmp = compare_pair(
            pair("login", summary(100, 1_000, 0.99), summary(80, 1_000, 0.99)),
            &Margins::default(),
        );
        let order: Vec<Metric> = cmp.deltas.iter().map(|d| d.metric).collect();
        assert_eq!(order, Metric::ALL.to_vec());

        let mean = cmp.delta(Metric::LatencyMean).unwrap();
        assert_eq!(mean.classification, Classification::Improved);
        assert!((mean.percent - (-20.0)).abs() < 1e-9);
        assert_eq!(
            cmp.delta(Metric::Requests).unwrap().classification,
            Classification::Unchanged
        );
    }

    #[test]
    fn compare_pair_success_is_compared_in_percent() {
        let margins = Margins {
            success: 1.0,
            ..Margins::default()
        };
        // 0.990 -> 0.985 is half a percentage point.
        let cmp = compare_pair(
            pair("login", summary(100, 1_000, 0.990), summary(100, 1_000, 0.985)),
            &margins,
        );
        let success = cmp.delta(Metric::Success).unwrap();
        assert_eq!(success.classification, Classification::WithinMargin);
        assert!((success.before.as_f64() - 99.0).abs() < 1e-9);
    }

    #[test]
    fn compare_pair_latency_margin_covers_all_percentiles() {
        let margins = Margins {
            latency: ms(50),
            ..Margins::default()
        };
        let cmp = compare_pair(
            pair("search", summary(100, 10, 1.0), summary(110, 10, 1.0)),
            &margins,
        );
        // max moves by 40ms, p99 by 30ms, p95 by 20ms, p50/mean by 10ms.
        for metric in [
            Metric::LatencyMean,
            Metric::LatencyP50,
            Metric::LatencyP95,
            Metric::LatencyP99,
            Metric::LatencyMax,
        ] {
            assert_eq!(
                cmp.delta(metric).unwrap().classification,
                Classification::WithinMargin,
                "{metric:?}"
            );
        }
    }

    #[test]
    fn report_new_keeps_pair_order_and_totals() {
        let totals = RunTotals::for_file(10, 2);
        let report = Report::new(
            vec![
                pair("a", summary(1, 1, 1.0), summary(1, 1, 1.0)),
                pair("b", summary(1, 1, 1.0), summary(2, 1, 1.0)),
            ],
            totals,
            &Margins::default(),
        );
        assert_eq!(report.scenarios.len(), 2);
        assert_eq!(report.scenarios[1].name, "b");
        assert_eq!(report.totals, totals);
        assert!(!report.is_empty());
        assert!(Report::default().is_empty());
    }
}
