mod cursor;
mod error;
mod payload;
mod signal;

pub mod analyzer;
pub mod differencer;
pub mod recommendations;
pub mod report;
pub mod scheduler;
pub mod shape;
pub mod tally;
pub mod thresholds;

#[cfg(test)]
mod test_support;

pub use analyzer::{CapacityVerdict, StageHealth, analyze, extract_concurrency};
pub use cursor::{StageCursor, StageTag};
pub use differencer::{StageBaseline, StageMetricRecord, finalize};
pub use error::{Error, Result};
pub use payload::{PayloadMetric, PayloadSamples, PayloadStat};
pub use recommendations::{Recommendations, recommend};
pub use report::{Report, RunInfo, ServiceMetrics, assemble};
pub use scheduler::{Clock, ManualClock, StageScheduler, SystemClock, Tick};
pub use shape::{PlanIssue, Preset, ShapeState, StageDef, StagePlan};
pub use signal::StopSignal;
pub use tally::{
    CompletionEvent, ErrorTally, EventTally, Outcome, TargetErrorTally, UNKNOWN_ERROR_KIND,
};
pub use thresholds::CapacityThresholds;
