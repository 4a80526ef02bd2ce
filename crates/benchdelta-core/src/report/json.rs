use std::io::Write;

use crate::compare::Report;
use crate::error::Result;
use crate::report::{render_err, Renderer};

/// Pretty-printed JSON export of the classified report.
pub struct JsonRenderer<'a> {
    out: &'a mut dyn Write,
}

impl<'a> JsonRenderer<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }
}

impl Renderer for JsonRenderer<'_> {
    fn render(&mut self, report: &Report) -> Result<()> {
        serde_json::to_writer_pretty(&mut *self.out, report).map_err(render_err)?;
        writeln!(self.out).map_err(render_err)?;
        self.out.flush().map_err(render_err)
    }
}
