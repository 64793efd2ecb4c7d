use serde::Serialize;

use crate::metrics::HistogramSummary;

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencySnapshot {
    /// Converts a microsecond histogram summary into milliseconds. Missing values become zero.
    pub fn from_micros(summary: &HistogramSummary) -> Self {
        let ms = |v: Option<f64>| v.map(|us| us / 1000.0).unwrap_or(0.0);
        Self {
            min: ms(summary.min),
            max: ms(summary.max),
            avg: ms(summary.mean),
            median: ms(summary.p50),
            p95: ms(summary.p95),
            p99: ms(summary.p99),
        }
    }
}

/// Point-in-time view of the cumulative counters.
///
/// Counters are monotonically non-decreasing for the lifetime of a store. A snapshot whose
/// counters are lower than an earlier one means the store was reset underneath its readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CumulativeSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub latency: LatencySnapshot,
    pub avg_content_size: f64,
}

impl CumulativeSnapshot {
    pub fn successes(&self) -> u64 {
        self.requests.saturating_sub(self.failures)
    }
}

/// Read-only access to a live statistics store.
pub trait CumulativeSource: Send + Sync {
    fn snapshot(&self) -> CumulativeSnapshot;
}

impl<T: CumulativeSource + ?Sized> CumulativeSource for std::sync::Arc<T> {
    fn snapshot(&self) -> CumulativeSnapshot {
        (**self).snapshot()
    }
}
