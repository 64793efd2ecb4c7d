use std::collections::BTreeMap;
use std::time::SystemTime;

use rampr_metrics::{CounterSnapshot, CumulativeSnapshot, LatencySnapshot, per_sec};
use serde::{Serialize, Serializer};

use crate::payload::PayloadStat;
use crate::tally::{ErrorShare, rank_errors};

const STAGE_TOP_ERRORS: usize = 5;

/// Counter values captured when a stage opens.
#[derive(Debug, Clone, PartialEq)]
pub struct StageBaseline {
    pub index: usize,
    pub label: String,
    pub target_concurrency: u64,
    /// `None` for stages that were never observed by a tick.
    pub epoch: Option<u64>,
    pub start_wallclock: SystemTime,
    pub requests_at_start: u64,
    pub failures_at_start: u64,
    pub quarantined: bool,
}

impl StageBaseline {
    pub fn capture(
        index: usize,
        label: impl Into<String>,
        target_concurrency: u64,
        epoch: Option<u64>,
        now: SystemTime,
        cumulative: &CumulativeSnapshot,
    ) -> Self {
        Self {
            index,
            label: label.into(),
            target_concurrency,
            epoch,
            start_wallclock: now,
            requests_at_start: cumulative.requests,
            failures_at_start: cumulative.failures,
            quarantined: false,
        }
    }

    #[must_use]
    pub fn quarantined(mut self, quarantined: bool) -> Self {
        self.quarantined = quarantined;
        self
    }
}

/// Which requests the latency block of a stage record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyScope {
    /// Copied from the run-wide distribution at stage end, not windowed to the stage.
    Cumulative,
}

/// Immutable per-stage result, produced once per stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetricRecord {
    pub index: usize,
    pub label: String,
    pub target_concurrency: u64,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub start_time: SystemTime,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub end_time: SystemTime,
    pub duration_seconds: f64,
    pub requests: u64,
    pub failures: u64,
    pub successful: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub throughput_rps: f64,
    pub latency: LatencySnapshot,
    pub latency_scope: LatencyScope,
    pub error_code_distribution: BTreeMap<String, u64>,
    pub top_errors: Vec<ErrorShare>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_stat: Option<PayloadStat>,
    /// Set for stages no tick ever landed in.
    pub skipped: bool,
    pub quarantined: bool,
}

/// Closes a stage: diffs `cumulative` against the stage's baseline.
///
/// Counters that moved backwards (a store reset) are clamped to zero and logged.
pub fn finalize(
    baseline: &StageBaseline,
    end_wallclock: SystemTime,
    cumulative: &CumulativeSnapshot,
    errors: BTreeMap<String, u64>,
    payload_stat: Option<PayloadStat>,
) -> StageMetricRecord {
    let requests = counter_delta(
        &baseline.label,
        "requests",
        baseline.requests_at_start,
        cumulative.requests,
    );
    let mut failures = counter_delta(
        &baseline.label,
        "failures",
        baseline.failures_at_start,
        cumulative.failures,
    );
    if failures > requests {
        tracing::warn!(
            stage = %baseline.label,
            requests,
            failures,
            "stage failures exceed requests; clamping"
        );
        failures = requests;
    }

    let duration_seconds = end_wallclock
        .duration_since(baseline.start_wallclock)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let (success_rate, error_rate) = if requests > 0 {
        let total = requests as f64;
        (
            (requests - failures) as f64 / total * 100.0,
            failures as f64 / total * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    StageMetricRecord {
        index: baseline.index,
        label: baseline.label.clone(),
        target_concurrency: baseline.target_concurrency,
        start_time: baseline.start_wallclock,
        end_time: end_wallclock,
        duration_seconds,
        requests,
        failures,
        successful: requests - failures,
        success_rate,
        error_rate,
        throughput_rps: per_sec(requests, duration_seconds),
        latency: cumulative.latency,
        latency_scope: LatencyScope::Cumulative,
        top_errors: rank_errors(&errors, STAGE_TOP_ERRORS),
        error_code_distribution: errors,
        payload_stat,
        skipped: baseline.epoch.is_none(),
        quarantined: baseline.quarantined,
    }
}

fn counter_delta(stage: &str, counter: &'static str, at_start: u64, now: u64) -> u64 {
    let start = CounterSnapshot::new(at_start);
    let end = CounterSnapshot::new(now);
    if end.regressed_since(start) {
        tracing::warn!(
            stage,
            counter,
            at_start,
            now,
            "cumulative counter went backwards; clamping stage delta to zero"
        );
    }
    end.delta_since(Some(start))
}

pub(crate) fn serialize_rfc3339<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&humantime::format_rfc3339_millis(*t))
}
