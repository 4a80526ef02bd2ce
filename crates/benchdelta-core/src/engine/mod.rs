pub mod aggregator;
pub mod pairer;

pub use aggregator::{aggregate, nearest_rank, AggregatedRecording, SummaryAggregator};
pub use pairer::{
    common_filenames, list_recordings, pair_scenarios, PairingPolicy, ScanOptions, ScanProgress,
    Side,
};
