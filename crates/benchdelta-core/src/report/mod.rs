//! Report renderers.
//!
//! Every renderer consumes the same classified [`Report`]; none of them
//! recomputes a delta or a classification.

pub mod json;
pub mod markdown;
pub mod spreadsheet;
pub mod tabular;

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::compare::{Margins, Report};
use crate::error::{BenchdeltaError, Result};

pub use json::JsonRenderer;
pub use markdown::MarkdownRenderer;
pub use spreadsheet::SpreadsheetRenderer;
pub use tabular::CsvRenderer;

/// Writes a classified [`Report`] in one output format.
pub trait Renderer {
    /// Render the whole report. Write failures come back as
    /// [`BenchdeltaError::Render`].
    fn render(&mut self, report: &Report) -> Result<()>;
}

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// Narrative report, one table per scenario.
    #[default]
    Markdown,
    /// One flat row per scenario.
    Csv,
    /// Colour-coded workbook with annotated cells.
    Spreadsheet,
    /// The classified report as JSON.
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportFormat::Markdown => "markdown",
            ReportFormat::Csv => "csv",
            ReportFormat::Spreadsheet => "spreadsheet",
            ReportFormat::Json => "json",
        };
        write!(f, "{s}")
    }
}

/// Render `report` in `format` to `out`.
pub fn render_report(
    format: ReportFormat,
    report: &Report,
    margins: &Margins,
    out: &mut dyn Write,
) -> Result<()> {
    tracing::debug!(%format, scenarios = report.scenarios.len(), "rendering report");
    match format {
        ReportFormat::Markdown => MarkdownRenderer::new(out).render(report),
        ReportFormat::Csv => CsvRenderer::new(out).render(report),
        ReportFormat::Spreadsheet => SpreadsheetRenderer::new(out, margins).render(report),
        ReportFormat::Json => JsonRenderer::new(out).render(report),
    }
}

pub(crate) fn render_err(e: impl fmt::Display) -> BenchdeltaError {
    BenchdeltaError::Render(e.to_string())
}

/// `12.3456` -> `"12.35"`, `1.0` -> `"1"`.
pub(crate) fn trim_decimals(value: f64, decimals: usize) -> String {
    let text = format!("{value:.decimals$}");
    if !text.contains('.') {
        return text;
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Duration;

    use crate::compare::{Margins, Report};
    use crate::results::{MetricsSummary, RunTotals, ScenarioPair};

    pub fn summary(
        latencies_ms: [i64; 5],
        success: f64,
        requests: u64,
        rate: f64,
    ) -> MetricsSummary {
        let [mean, p50, p95, p99, max] = latencies_ms.map(Duration::milliseconds);
        let mut s = MetricsSummary::default();
        s.requests = requests;
        s.rate = rate;
        s.throughput = rate * success;
        s.duration = Duration::seconds(60);
        s.latencies.mean = mean;
        s.latencies.p50 = p50;
        s.latencies.p95 = p95;
        s.latencies.p99 = p99;
        s.latencies.max = max;
        s.latencies.min = Duration::milliseconds(1);
        s.bytes_out.total = requests * 20;
        s.bytes_out.mean = 20.0;
        s.bytes_in.total = requests * 512;
        s.bytes_in.mean = 512.0;
        s.success = success;
        s
    }

    /// The "checkout" scenario: mean 178 -> 142 ms, p99 517 -> 613 ms.
    pub fn checkout_report() -> Report {
        let pair = ScenarioPair {
            name: "checkout".to_string(),
            file: "checkout.json".to_string(),
            before: summary([178, 131, 436, 517, 523], 0.01, 6_000, 100.0),
            after: summary([142, 130, 167, 613, 655], 0.01, 6_000, 100.0),
        };
        Report::new(
            vec![pair],
            RunTotals {
                dataset_bytes: 4_096_000,
                requests: 12_000,
                files: 2,
            },
            &Margins::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_decimals_drops_trailing_zeros() {
        assert_eq!(trim_decimals(1.0, 2), "1");
        assert_eq!(trim_decimals(99.5, 2), "99.5");
        assert_eq!(trim_decimals(12.3456, 2), "12.35");
        assert_eq!(trim_decimals(100.0, 2), "100");
        assert_eq!(trim_decimals(-0.001, 2), "0");
    }

    #[test]
    fn render_report_dispatches_on_format() {
        let report = fixtures::checkout_report();
        let margins = Margins::default();
        for format in [
            ReportFormat::Markdown,
            ReportFormat::Csv,
            ReportFormat::Spreadsheet,
            ReportFormat::Json,
        ] {
            let mut out = Vec::new();
            render_report(format, &report, &margins, &mut out).expect("render should succeed");
            assert!(!out.is_empty(), "{format} produced nothing");
        }
    }

    #[test]
    fn render_errors_become_render_variant() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let err = render_report(
            ReportFormat::Markdown,
            &fixtures::checkout_report(),
            &Margins::default(),
            &mut Broken,
        )
        .unwrap_err();
        assert!(matches!(err, BenchdeltaError::Render(_)));
    }

    #[test]
    fn report_format_default_is_markdown() {
        assert_eq!(ReportFormat::default(), ReportFormat::Markdown);
        assert_eq!(ReportFormat::Spreadsheet.to_string(), "spreadsheet");
    }
}
