use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::metrics::{new_default_histogram, summarize_histogram};
use crate::snapshot::{CumulativeSnapshot, CumulativeSource, LatencySnapshot};

#[derive(Debug, Clone, Copy)]
pub struct RequestSample {
    pub elapsed: Duration,
    pub failed: bool,
    /// Response body length in bytes.
    pub content_length: u64,
    /// Index of the named target the request went to, in registration order.
    pub target: Option<usize>,
}

#[derive(Debug)]
struct Totals {
    requests: AtomicU64,
    failures: AtomicU64,
    content_bytes: AtomicU64,
    latency_us: Mutex<Histogram<u64>>,
}

impl Default for Totals {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            content_bytes: AtomicU64::new(0),
            latency_us: Mutex::new(new_default_histogram()),
        }
    }
}

impl Totals {
    fn record(&self, sample: &RequestSample) {
        let us = sample.elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        {
            let mut h = self.latency_us.lock();
            let _ = h.record(us.max(1));
        }

        if sample.content_length != 0 {
            self.content_bytes
                .fetch_add(sample.content_length, Ordering::Relaxed);
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        if sample.failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> CumulativeSnapshot {
        // Failures are loaded first so a racing `record` can only make `requests` look larger.
        let failures = self.failures.load(Ordering::Relaxed);
        let requests = self.requests.load(Ordering::Relaxed);
        let content = self.content_bytes.load(Ordering::Relaxed);

        let latency = {
            let h = self.latency_us.lock();
            LatencySnapshot::from_micros(&summarize_histogram(&h))
        };

        let avg_content_size = if requests > 0 {
            content as f64 / requests as f64
        } else {
            0.0
        };

        CumulativeSnapshot {
            requests,
            failures: failures.min(requests),
            latency,
            avg_content_size,
        }
    }
}

/// Cumulative statistics of one named target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub name: Arc<str>,
    pub stats: CumulativeSnapshot,
}

/// Cumulative request statistics for a whole run, updated by every completing request.
///
/// Targets registered at construction additionally get their own totals; samples tagged
/// with an unregistered index count toward the run totals only.
#[derive(Debug, Default)]
pub struct StatsStore {
    overall: Totals,
    targets: Vec<(Arc<str>, Totals)>,
}

impl StatsStore {
    pub fn with_targets<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Arc<str>>,
    {
        Self {
            overall: Totals::default(),
            targets: names
                .into_iter()
                .map(|n| (n.into(), Totals::default()))
                .collect(),
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.overall.requests.load(Ordering::Relaxed)
    }

    pub fn failures_total(&self) -> u64 {
        self.overall.failures.load(Ordering::Relaxed)
    }

    pub fn record(&self, sample: RequestSample) {
        self.overall.record(&sample);
        if let Some((_, totals)) = sample.target.and_then(|i| self.targets.get(i)) {
            totals.record(&sample);
        }
    }

    /// Per-target statistics in registration order.
    pub fn target_snapshots(&self) -> Vec<TargetSnapshot> {
        self.targets
            .iter()
            .map(|(name, totals)| TargetSnapshot {
                name: name.clone(),
                stats: totals.snapshot(),
            })
            .collect()
    }
}

impl CumulativeSource for StatsStore {
    fn snapshot(&self) -> CumulativeSnapshot {
        self.overall.snapshot()
    }
}
