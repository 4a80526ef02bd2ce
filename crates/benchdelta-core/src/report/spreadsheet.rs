//! Colour-coded comparison matrix written as an Office Open XML (`.xlsx`)
//! workbook.
//!
//! Layout:
//!
//! ```text
//! row 1-5  legend (column A), run totals (C-D), margins (F-L)
//! row 7    column headers
//! row 8..  one row per scenario
//! ```

use std::io::Write;

use chrono::Duration;
use rust_xlsxwriter::{ColNum, Color, Format, FormatPattern, Note, RowNum, Workbook, Worksheet};

use crate::compare::{
    percentage_increase, Classification, Margins, Metric, MetricDelta, MetricValue, Report,
};
use crate::duration::{round_duration, smart_format, to_text};
use crate::error::Result;
use crate::report::{render_err, Renderer};

const SHEET_NAME: &str = "Comparison";
const NOTE_AUTHOR: &str = "benchdelta";
const HEADER_ROW: RowNum = 6;
const MARGINS_COLUMN: ColNum = 5;

const LEGEND: [(&str, Classification); 4] = [
    ("Good", Classification::Improved),
    ("No change", Classification::Unchanged),
    ("Within margin of error", Classification::WithinMargin),
    ("Individual metric worse", Classification::Regressed),
];

const COLUMN_WIDTHS: [f64; 13] = [
    24.0, 17.0, 16.0, 16.0, 11.0, 11.0, 11.0, 11.0, 11.0, 21.0, 21.0, 13.0, 13.0,
];

/// Decimals and unit used for the non-duration metric cells.
fn presentation(metric: Metric) -> (usize, &'static str) {
    match metric {
        Metric::Throughput => (1, "requests"),
        Metric::Requests | Metric::Rate => (0, "requests"),
        Metric::BytesOutMean | Metric::BytesInMean => (0, "bytes"),
        Metric::Success => (0, "percent"),
        _ => (0, ""),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Bold,
    Count,
    DataSize,
    Class(Classification),
}

struct Formats {
    bold: Format,
    count: Format,
    data_size: Format,
    improved: Format,
    unchanged: Format,
    within_margin: Format,
    regressed: Format,
}

impl Formats {
    fn new() -> Self {
        let fill = |rgb: u32| {
            Format::new()
                .set_pattern(FormatPattern::Solid)
                .set_background_color(Color::RGB(rgb))
        };
        Self {
            bold: Format::new().set_bold(),
            count: Format::new().set_num_format("#,##0"),
            data_size: Format::new().set_num_format(
                "[<1000000]0.00,\" KB\";[<1000000000]0.00,,\" MB\";0.00,,,\" GB\"",
            ),
            improved: fill(0x29FD2E),
            unchanged: fill(0xB7B7B7),
            within_margin: fill(0xCCCCCC),
            regressed: fill(0xFC0D1B).set_font_color(Color::White),
        }
    }

    fn get(&self, style: Style) -> &Format {
        match style {
            Style::Bold => &self.bold,
            Style::Count => &self.count,
            Style::DataSize => &self.data_size,
            Style::Class(Classification::Improved) => &self.improved,
            Style::Class(Classification::Unchanged) => &self.unchanged,
            Style::Class(Classification::WithinMargin) => &self.within_margin,
            Style::Class(Classification::Regressed) => &self.regressed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Data {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    data: Data,
    style: Option<Style>,
    note: Option<String>,
}

impl Cell {
    fn text(text: impl Into<String>) -> Self {
        Self {
            data: Data::Text(text.into()),
            style: None,
            note: None,
        }
    }

    fn number(value: f64) -> Self {
        Self {
            data: Data::Number(value),
            style: None,
            note: None,
        }
    }

    fn styled(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    fn noted(mut self, note: String) -> Self {
        self.note = Some(note);
        self
    }
}

fn put(
    sheet: &mut Worksheet,
    formats: &Formats,
    row: RowNum,
    col: ColNum,
    cell: &Cell,
) -> Result<()> {
    match (&cell.data, cell.style) {
        (Data::Text(text), Some(style)) => {
            sheet.write_string_with_format(row, col, text, formats.get(style))
        }
        (Data::Text(text), None) => sheet.write_string(row, col, text),
        (Data::Number(value), Some(style)) => {
            sheet.write_number_with_format(row, col, *value, formats.get(style))
        }
        (Data::Number(value), None) => sheet.write_number(row, col, *value),
    }
    .map_err(render_err)?;

    if let Some(text) = &cell.note {
        let note = Note::new(text).set_author(NOTE_AUTHOR);
        sheet.insert_note(row, col, &note).map_err(render_err)?;
    }
    Ok(())
}

fn put_row(
    sheet: &mut Worksheet,
    formats: &Formats,
    row: RowNum,
    first_col: ColNum,
    cells: &[Cell],
) -> Result<()> {
    for (col, cell) in (first_col..).zip(cells) {
        put(sheet, formats, row, col, cell)?;
    }
    Ok(())
}

fn metric_cell(delta: &MetricDelta) -> Cell {
    let percent = format!("{:.0}%", delta.percent);
    let (decimals, unit) = presentation(delta.metric);
    let change = match delta.before.difference(delta.after) {
        Some(MetricValue::Duration(change)) => smart_format(change),
        Some(change) => format!("{:.decimals$} {unit}", change.as_f64()),
        None => String::new(),
    };
    let note = match (delta.before, delta.after) {
        (MetricValue::Duration(before), MetricValue::Duration(after)) => format!(
            "{} -> {} ({percent})",
            smart_format(before),
            smart_format(after)
        ),
        (before, after) => format!(
            "{:.decimals$} {unit} -> {:.decimals$} {unit} ({percent})",
            before.as_f64(),
            after.as_f64()
        ),
    };
    Cell::text(change)
        .styled(Style::Class(delta.classification))
        .noted(note)
}

fn duration_cell(before: Duration, after: Duration) -> Cell {
    let three = Duration::seconds(3);
    let percent = percentage_increase(before, after);
    let before = smart_format(round_duration(before, three));
    let after = smart_format(round_duration(after, three));
    Cell::text(after.clone()).noted(format!("{before} -> {after} ({percent:.0}%)"))
}

fn margin_cells(margins: &Margins) -> (Vec<Cell>, Vec<Cell>) {
    [
        ("Total requests margin", Cell::number(margins.requests as f64)),
        ("Request rate margin", Cell::number(margins.rate)),
        ("Throughput margin", Cell::number(margins.throughput)),
        ("Latency margin", Cell::text(to_text(margins.latency))),
        ("Mean bytes sent margin", Cell::number(margins.bytes_out_mean)),
        ("Mean bytes received margin", Cell::number(margins.bytes_in_mean)),
        ("Success margin", Cell::number(margins.success)),
    ]
    .into_iter()
    .map(|(label, value)| (Cell::text(label).styled(Style::Bold), value))
    .unzip()
}

fn fill_sheet(sheet: &mut Worksheet, report: &Report, margins: &Margins) -> Result<()> {
    let formats = Formats::new();
    sheet.set_name(SHEET_NAME).map_err(render_err)?;
    for (col, width) in (0..).zip(COLUMN_WIDTHS) {
        sheet.set_column_width(col, width).map_err(render_err)?;
    }

    // Legend, run totals and margins.
    for (row, (label, classification)) in (0..).zip(LEGEND) {
        let cell = Cell::text(label).styled(Style::Class(classification));
        put(sheet, &formats, row + 1, 0, &cell)?;
    }
    put(sheet, &formats, 0, 0, &Cell::text("Legend").styled(Style::Bold))?;
    put_row(
        sheet,
        &formats,
        0,
        2,
        &[
            Cell::text("Dataset total").styled(Style::Bold),
            Cell::text("Requests total").styled(Style::Bold),
        ],
    )?;
    put_row(
        sheet,
        &formats,
        1,
        2,
        &[
            Cell::number(report.totals.dataset_bytes as f64).styled(Style::DataSize),
            Cell::number(report.totals.requests as f64).styled(Style::Count),
        ],
    )?;
    let (labels, values) = margin_cells(margins);
    put_row(sheet, &formats, 0, MARGINS_COLUMN, &labels)?;
    put_row(sheet, &formats, 1, MARGINS_COLUMN, &values)?;

    // Column headers.
    let mut headers = vec![Cell::text("Name").styled(Style::Bold)];
    headers.extend(
        Metric::ALL
            .iter()
            .map(|m| Cell::text(format!("{} change", m.label())).styled(Style::Bold)),
    );
    headers.push(Cell::text("Test duration").styled(Style::Bold));
    put_row(sheet, &formats, HEADER_ROW, 0, &headers)?;
    sheet
        .set_freeze_panes(HEADER_ROW + 1, 1)
        .map_err(render_err)?;

    for (row, scenario) in (HEADER_ROW + 1..).zip(&report.scenarios) {
        let mut cells =
            vec![Cell::text(scenario.name.clone()).noted(format!("Name: {}", scenario.name))];
        cells.extend(scenario.deltas.iter().map(metric_cell));
        cells.push(duration_cell(scenario.before.duration, scenario.after.duration));
        put_row(sheet, &formats, row, 0, &cells)?;
    }
    Ok(())
}

/// Matrix renderer. Every metric cell shows the change, carries a note
/// with the raw before and after values, and is coloured by classification.
pub struct SpreadsheetRenderer<'a> {
    out: &'a mut dyn Write,
    margins: &'a Margins,
}

impl<'a> SpreadsheetRenderer<'a> {
    pub fn new(out: &'a mut dyn Write, margins: &'a Margins) -> Self {
        Self { out, margins }
    }
}

impl Renderer for SpreadsheetRenderer<'_> {
    fn render(&mut self, report: &Report) -> Result<()> {
        let mut workbook = Workbook::new();
        fill_sheet(workbook.add_worksheet(), report, self.margins)?;
        let bytes = workbook.save_to_buffer().map_err(render_err)?;
        self.out.write_all(&bytes).map_err(render_err)?;
        self.out.flush().map_err(render_err)
    }
}
