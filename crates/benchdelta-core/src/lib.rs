pub mod compare;
pub mod duration;
pub mod engine;
pub mod error;
pub mod record;
pub mod report;
pub mod results;

pub use compare::{Classification, Margins, Metric, Report};
pub use engine::{pair_scenarios, PairingPolicy, ScanOptions, ScanProgress};
pub use error::BenchdeltaError;
pub use report::{render_report, ReportFormat};
