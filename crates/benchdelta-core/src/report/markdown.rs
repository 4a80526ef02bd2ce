use std::io::Write;

use crate::compare::{Metric, MetricDelta, Report, ScenarioComparison};
use crate::error::Result;
use crate::report::{render_err, trim_decimals, Renderer};

const LATENCY_COLUMNS: [Metric; 5] = [
    Metric::LatencyMean,
    Metric::LatencyP50,
    Metric::LatencyP95,
    Metric::LatencyP99,
    Metric::LatencyMax,
];

/// Narrative report: a heading and a one-row table per scenario.
pub struct MarkdownRenderer<'a> {
    out: &'a mut dyn Write,
}

impl<'a> MarkdownRenderer<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }

    fn scenario(&mut self, scenario: &ScenarioComparison) -> std::io::Result<()> {
        let mut cells: Vec<String> = LATENCY_COLUMNS
            .iter()
            .map(|&metric| scenario.delta(metric).map(change_cell).unwrap_or_default())
            .collect();
        cells.push(format!(
            "{}% → {}%",
            trim_decimals(scenario.before.success * 100.0, 2),
            trim_decimals(scenario.after.success * 100.0, 2)
        ));

        writeln!(self.out, "### {}", scenario.name)?;
        writeln!(self.out)?;
        writeln!(self.out, "| Mean | P50 | P95 | P99 | Max | Success Ratio |")?;
        writeln!(self.out, "|------|-----|-----|-----|-----|---------------|")?;
        writeln!(self.out, "| {} |", cells.join(" | "))?;
        writeln!(self.out)
    }
}

fn change_cell(delta: &MetricDelta) -> String {
    format!("{} → {} ({:+.2}%)", delta.before, delta.after, delta.percent)
}

impl Renderer for MarkdownRenderer<'_> {
    fn render(&mut self, report: &Report) -> Result<()> {
        for scenario in &report.scenarios {
            self.scenario(scenario).map_err(render_err)?;
        }
        self.out.flush().map_err(render_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::checkout_report;

    fn render(report: &Report) -> String {
        let mut out = Vec::new();
        MarkdownRenderer::new(&mut out)
            .render(report)
            .expect("render should succeed");
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn renders_heading_and_table() {
        let text = render(&checkout_report());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "### checkout");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "| Mean | P50 | P95 | P99 | Max | Success Ratio |");
        assert_eq!(lines[3], "|------|-----|-----|-----|-----|---------------|");
    }

    #[test]
    fn renders_deltas_with_sign_and_two_decimals() {
        let text = render(&checkout_report());
        let row = text.lines().nth(4).unwrap();
        assert_eq!(
            row,
            "| 178ms → 142ms (-20.22%) | 131ms → 130ms (-0.76%) | 436ms → 167ms (-61.70%) \
             | 517ms → 613ms (+18.57%) | 523ms → 655ms (+25.24%) | 1% → 1% |"
        );
    }

    #[test]
    fn empty_report_renders_nothing() {
        assert_eq!(render(&Report::default()), "");
    }

    #[test]
    fn one_section_per_scenario() {
        let mut report = checkout_report();
        let mut second = report.scenarios[0].clone();
        second.name = "search".to_string();
        report.scenarios.push(second);
        let text = render(&report);
        assert_eq!(text.matches("### ").count(), 2);
        assert!(text.contains("### search"));
    }
}
