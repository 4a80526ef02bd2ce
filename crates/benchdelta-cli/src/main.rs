//! benchdelta - compare the recordings of two load-test runs.
//!
//! ```text
//! benchdelta [--csv | --xlsx | --json] [margins...] before/ after/
//! ```
//!
//! Every file present in both directories is one scenario. The report goes to
//! stdout, diagnostics and progress to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use benchdelta_core::duration::parse_duration;
use benchdelta_core::engine::{pair_scenarios, PairingPolicy, ScanOptions, ScanProgress};
use benchdelta_core::error::{BenchdeltaError, Result};
use benchdelta_core::report::{render_report, ReportFormat};
use benchdelta_core::results::RunTotals;
use benchdelta_core::{Margins, Report};
use chrono::Duration;
use clap::{ArgGroup, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "benchdelta", version, about = "Compare before/after load-test recordings")]
#[command(group(ArgGroup::new("format").args(["csv", "xlsx", "json"])))]
struct Cli {
    /// Directory with the recordings of the baseline run
    before: PathBuf,

    /// Directory with the recordings of the run to compare against the baseline
    after: PathBuf,

    /// Output comma separated values
    #[arg(long)]
    csv: bool,

    /// Output a colour-coded xlsx workbook
    #[arg(long)]
    xlsx: bool,

    /// Output the classified report as JSON
    #[arg(long)]
    json: bool,

    /// Print progress messages to stderr
    #[arg(long)]
    progress: bool,

    /// Margin of error for total requests (in requests)
    #[arg(long, value_name = "REQUESTS")]
    total_requests_margin: Option<u64>,

    /// Margin of error for throughput (in requests per second)
    #[arg(long, value_name = "RPS")]
    throughput_margin: Option<f64>,

    /// Margin of error for mean bytes sent (in bytes)
    #[arg(long, value_name = "BYTES")]
    mean_bytes_sent_margin: Option<f64>,

    /// Margin of error for mean bytes received (in bytes)
    #[arg(long, value_name = "BYTES")]
    mean_bytes_received_margin: Option<f64>,

    /// Margin of error for the success percentage (in percentage points, 0.0 - 100.0)
    #[arg(long, value_name = "POINTS")]
    success_margin: Option<f64>,

    /// Margin of error for mean, P50, P95, P99 and max latency (e.g. "30ms")
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    request_duration_margin: Option<Duration>,

    /// JSON file with margins; flags given on the command line take precedence
    #[arg(long, value_name = "FILE")]
    margins: Option<PathBuf>,

    /// Fail when a recording exists in only one of the two directories
    #[arg(long)]
    strict: bool,

    /// Number of recordings aggregated concurrently [default: number of CPUs]
    #[arg(long, short = 'j', value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    jobs: Option<u64>,
}

impl Cli {
    fn format(&self) -> ReportFormat {
        if self.csv {
            ReportFormat::Csv
        } else if self.xlsx {
            ReportFormat::Spreadsheet
        } else if self.json {
            ReportFormat::Json
        } else {
            ReportFormat::Markdown
        }
    }

    fn resolve_margins(&self) -> Result<Margins> {
        let mut margins = match &self.margins {
            Some(path) => Margins::load(path)?,
            None => Margins::default(),
        };
        if let Some(requests) = self.total_requests_margin {
            margins.requests = requests;
        }
        if let Some(throughput) = self.throughput_margin {
            margins.throughput = throughput;
        }
        if let Some(bytes) = self.mean_bytes_sent_margin {
            margins.bytes_out_mean = bytes;
        }
        if let Some(bytes) = self.mean_bytes_received_margin {
            margins.bytes_in_mean = bytes;
        }
        if let Some(points) = self.success_margin {
            margins.success = points;
        }
        if let Some(latency) = self.request_duration_margin {
            margins.latency = latency;
        }
        margins.validate()?;
        Ok(margins)
    }

    fn scan_options(&self) -> Result<ScanOptions> {
        let mut options = ScanOptions::default();
        if self.strict {
            options.policy = PairingPolicy::Strict;
        }
        if let Some(jobs) = self.jobs {
            options.jobs = usize::try_from(jobs)
                .map_err(|_| BenchdeltaError::Config(format!("--jobs {jobs} is too large")))?;
        }
        Ok(options)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print running totals as recordings complete.
fn spawn_progress_reporter() -> (mpsc::UnboundedSender<ScanProgress>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ScanProgress>();
    let handle = tokio::spawn(async move {
        let mut totals = RunTotals::default();
        while let Some(event) = rx.recv().await {
            totals = totals.merge(RunTotals::for_file(event.bytes, event.requests));
            eprintln!(
                "Consumed {} bytes, {} requests, from {} files",
                totals.dataset_bytes, totals.requests, totals.files
            );
        }
    });
    (tx, handle)
}

/// Scan, compare and render into memory so nothing reaches stdout unless
/// the whole report succeeded.
async fn run(cli: &Cli) -> Result<Vec<u8>> {
    let margins = cli.resolve_margins()?;
    let options = cli.scan_options()?;
    let format = cli.format();
    tracing::debug!(?margins, ?options, %format, "starting comparison");

    let (progress, reporter) = if cli.progress {
        let (tx, handle) = spawn_progress_reporter();
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };

    let (pairs, totals) = pair_scenarios(&cli.before, &cli.after, &options, progress).await?;
    if let Some(reporter) = reporter {
        reporter
            .await
            .map_err(|e| BenchdeltaError::Internal(format!("progress reporter failed: {e}")))?;
    }

    let report = Report::new(pairs, totals, &margins);
    let mut buffer = Vec::new();
    render_report(format, &report, &margins, &mut buffer)?;
    Ok(buffer)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing();

    let output = match run(&cli).await {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&output).and_then(|()| stdout.flush()) {
        eprintln!("Error: {}", BenchdeltaError::Render(e.to_string()));
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
