use std::collections::BTreeMap;
use std::time::SystemTime;

use rampr_metrics::LatencySnapshot;

use crate::analyzer::extract_concurrency;
use crate::differencer::{LatencyScope, StageMetricRecord};

/// A finished stage with `requests` requests at `error_rate` percent and the given p95.
pub(crate) fn record(index: usize, label: &str, requests: u64, error_rate: f64, p95: f64) -> StageMetricRecord {
    let failures = (requests as f64 * error_rate / 100.0).round() as u64;
    StageMetricRecord {
        index,
        label: label.to_string(),
        target_concurrency: extract_concurrency(label).unwrap_or(0),
        start_time: SystemTime::UNIX_EPOCH,
        end_time: SystemTime::UNIX_EPOCH,
        duration_seconds: 60.0,
        requests,
        failures,
        successful: requests - failures,
        success_rate: 100.0 - error_rate,
        error_rate,
        throughput_rps: requests as f64 / 60.0,
        latency: LatencySnapshot {
            p95,
            p99: p95 * 1.2,
            avg: p95 / 2.0,
            ..LatencySnapshot::default()
        },
        latency_scope: LatencyScope::Cumulative,
        error_code_distribution: BTreeMap::new(),
        top_errors: Vec::new(),
        payload_stat: None,
        skipped: false,
        quarantined: false,
    }
}
