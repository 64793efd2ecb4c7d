pub mod agg;
pub mod metrics;
pub mod snapshot;
pub mod store;

pub use agg::{CounterSnapshot, per_sec};
pub use metrics::HistogramSummary;
pub use snapshot::{CumulativeSnapshot, CumulativeSource, LatencySnapshot};
pub use store::{RequestSample, StatsStore, TargetSnapshot};
