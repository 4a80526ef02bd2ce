use std::io::Write;

use chrono::Duration;

use crate::compare::{Metric, Report, ScenarioComparison};
use crate::duration::{round_duration, smart_format};
use crate::error::Result;
use crate::report::{render_err, Renderer};

/// Metrics emitted as `[change, before, after]` column triples, in order.
const TRIPLES: [Metric; 8] = [
    Metric::BytesOutMean,
    Metric::BytesInMean,
    Metric::Throughput,
    Metric::LatencyMean,
    Metric::LatencyP50,
    Metric::LatencyP95,
    Metric::LatencyP99,
    Metric::LatencyMax,
];

/// Flat CSV export: a header row, then one row per scenario.
///
/// The column order is stable so that the output can be consumed by
/// position.
pub struct CsvRenderer<'a> {
    out: &'a mut dyn Write,
}

impl<'a> CsvRenderer<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }
}

/// Column names, in row order.
pub fn header() -> Vec<String> {
    let mut columns = vec![
        "Name".to_string(),
        "Queries per second".to_string(),
        "Duration".to_string(),
    ];
    for metric in TRIPLES {
        let label = metric.label();
        columns.push(format!("{label} change"));
        columns.push(format!("{label} before"));
        columns.push(format!("{label} after"));
    }
    columns.extend(
        [
            "Success before",
            "Success after",
            "Total sent bytes before",
            "Total sent bytes after",
            "Total received bytes before",
            "Total received bytes after",
        ]
        .map(String::from),
    );
    columns
}

fn row(scenario: &ScenarioComparison) -> Vec<String> {
    let (before, after) = (&scenario.before, &scenario.after);
    let mut cells = vec![
        scenario.name.clone(),
        format!("{:.0}", after.rate),
        smart_format(round_duration(after.duration, Duration::seconds(3))),
    ];
    for metric in TRIPLES {
        match scenario.delta(metric) {
            Some(delta) => {
                cells.push(format!("{:.0}%", delta.percent));
                cells.push(delta.before.to_string());
                cells.push(delta.after.to_string());
            }
            None => cells.extend([String::new(), String::new(), String::new()]),
        }
    }
    cells.push(format!("{:.1}%", before.success * 100.0));
    cells.push(format!("{:.1}%", after.success * 100.0));
    cells.push(before.bytes_out.total.to_string());
    cells.push(after.bytes_out.total.to_string());
    cells.push(before.bytes_in.total.to_string());
    cells.push(after.bytes_in.total.to_string());
    cells
}

impl Renderer for CsvRenderer<'_> {
    fn render(&mut self, report: &Report) -> Result<()> {
        let mut writer = csv::Writer::from_writer(&mut *self.out);
        writer.write_record(header()).map_err(render_err)?;
        for scenario in &report.scenarios {
            writer.write_record(row(scenario)).map_err(render_err)?;
        }
        writer.flush().map_err(render_err)
    }
}
