use std::collections::{BTreeMap, HashSet};
use std::time::SystemTime;

use rampr_metrics::{CumulativeSnapshot, LatencySnapshot, TargetSnapshot, per_sec};
use serde::ser::SerializeMap as _;
use serde::{Serialize, Serializer};

use crate::analyzer::CapacityVerdict;
use crate::differencer::{StageMetricRecord, serialize_rfc3339};
use crate::payload::PayloadStat;
use crate::recommendations::{Recommendations, recommend};
use crate::shape::PlanIssue;
use crate::tally::{ErrorShare, ErrorTally, TargetErrorTally, rank_errors};
use crate::thresholds::CapacityThresholds;

const TEST_TYPE: &str = "load_shaping";
const TOP_ERRORS: usize = 5;

/// Facts about the run that are not measurements.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub service: String,
    pub target: Option<String>,
    pub start_time: SystemTime,
    pub total_duration_seconds: f64,
    pub planned_duration_seconds: f64,
    pub stage_count: usize,
    pub shape_issues: Vec<PlanIssue>,
    pub thresholds: CapacityThresholds,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestInfo {
    pub test_type: &'static str,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Named targets, in rotation order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub start_time: SystemTime,
    pub total_duration_seconds: f64,
    pub planned_duration_seconds: f64,
    pub stage_count: usize,
    pub shape_issues: Vec<PlanIssue>,
    pub thresholds: CapacityThresholds,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallStatistics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub latency: LatencySnapshot,
    pub requests_per_second: f64,
    pub avg_content_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_stat: Option<PayloadStat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub total_errors: u64,
    pub by_code: BTreeMap<String, u64>,
    pub distribution: Vec<ErrorShare>,
    pub top_errors: Vec<ErrorShare>,
    /// Errors that completed while no stage was open.
    pub unattributed: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    /// Authoritative count from the cumulative store.
    pub total_requests: u64,
    pub stage_total_requests: u64,
    /// `stage_total_requests - total_requests`.
    pub discrepancy: i64,
    pub late_events: u64,
    pub note: String,
}

/// Run-wide figures for one named target.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    #[serde(skip)]
    pub name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub error_codes: BTreeMap<String, u64>,
    pub top_errors: Vec<ErrorShare>,
    pub latency: LatencySnapshot,
    pub requests_per_second: f64,
    pub avg_content_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_stat: Option<PayloadStat>,
}

impl ServiceMetrics {
    fn new(target: &TargetSnapshot, tally: Option<&TargetErrorTally>, duration_seconds: f64) -> Self {
        let stats = &target.stats;
        let (success_rate, error_rate) = rates(stats);
        let error_codes = tally.map(|t| t.errors.clone()).unwrap_or_default();
        Self {
            name: target.name.to_string(),
            total_requests: stats.requests,
            successful_requests: stats.successes(),
            failed_requests: stats.failures,
            success_rate,
            error_rate,
            top_errors: rank_errors(&error_codes, TOP_ERRORS),
            error_codes,
            latency: stats.latency,
            requests_per_second: per_sec(stats.requests, duration_seconds),
            avg_content_size: stats.avg_content_size,
            payload_stat: tally
                .and_then(|t| t.payload.clone())
                .filter(|p| p.count > 0 || p.skipped > 0),
        }
    }
}

/// Targets in rotation order, serialized as a `name -> metrics` map.
#[derive(Debug, Clone, Default)]
pub struct ServiceRecords(pub Vec<ServiceMetrics>);

impl ServiceRecords {
    pub fn iter(&self) -> impl Iterator<Item = &ServiceMetrics> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ServiceRecords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut keys = UniqueKeys::with_capacity(self.0.len());
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (i, service) in self.0.iter().enumerate() {
            map.serialize_entry(&keys.claim(&service.name, i + 1), service)?;
        }
        map.end()
    }
}

/// Stage records in run order, serialized as a `label -> record` map.
#[derive(Debug, Clone, Default)]
pub struct StageRecords(pub Vec<StageMetricRecord>);

impl StageRecords {
    pub fn iter(&self) -> impl Iterator<Item = &StageMetricRecord> {
        self.0.iter()
    }
}

impl Serialize for StageRecords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut keys = UniqueKeys::with_capacity(self.0.len());
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for record in &self.0 {
            map.serialize_entry(&keys.claim(&record.label, record.index + 1), record)?;
        }
        map.end()
    }
}

/// Hands out map keys that never repeat, even when a malformed shape repeats a label or a
/// label already looks like a generated one.
struct UniqueKeys(HashSet<String>);

impl UniqueKeys {
    fn with_capacity(n: usize) -> Self {
        Self(HashSet::with_capacity(n))
    }

    /// `label`, else `"{label} #{ordinal}"`, else the next free ordinal after it.
    fn claim(&mut self, label: &str, ordinal: usize) -> String {
        let mut key = label.to_string();
        let mut n = ordinal;
        while self.0.contains(&key) {
            key = format!("{label} #{n}");
            n += 1;
        }
        self.0.insert(key.clone());
        key
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub test_info: TestInfo,
    pub overall_statistics: OverallStatistics,
    pub error_analysis: ErrorAnalysis,
    pub stage_by_stage_metrics: StageRecords,
    /// Only present when the shape rotates over named targets.
    #[serde(skip_serializing_if = "ServiceRecords::is_empty")]
    pub per_service_metrics: ServiceRecords,
    pub capacity_analysis: CapacityVerdict,
    pub recommendations: Recommendations,
    pub validation: Validation,
}

/// Builds the final report. Pure: no I/O, no clock reads.
///
/// Targets that completed no requests are left out of `per_service_metrics`.
pub fn assemble(
    info: RunInfo,
    overall: &CumulativeSnapshot,
    targets: &[TargetSnapshot],
    records: Vec<StageMetricRecord>,
    tally: &ErrorTally,
    verdict: CapacityVerdict,
) -> Report {
    let recommendations = recommend(&verdict, &records, &info.thresholds);
    let validation = validate(overall, &records, tally);
    let (success_rate, error_rate) = rates(overall);

    let services = targets
        .iter()
        .filter(|t| t.stats.requests > 0)
        .map(|t| ServiceMetrics::new(t, tally.target(&t.name), info.total_duration_seconds))
        .collect();

    let overall_statistics = OverallStatistics {
        total_requests: overall.requests,
        failed_requests: overall.failures,
        successful_requests: overall.successes(),
        success_rate,
        error_rate,
        latency: overall.latency,
        requests_per_second: per_sec(overall.requests, info.total_duration_seconds),
        avg_content_size: overall.avg_content_size,
        payload_stat: tally.payload.clone(),
    };

    let distribution = rank_errors(&tally.global, usize::MAX);
    let error_analysis = ErrorAnalysis {
        total_errors: tally.total_errors(),
        by_code: tally.global.clone(),
        top_errors: distribution.iter().take(TOP_ERRORS).cloned().collect(),
        distribution,
        unattributed: tally.unattributed.clone(),
    };

    Report {
        test_info: TestInfo {
            test_type: TEST_TYPE,
            service: info.service,
            target: info.target,
            services: targets.iter().map(|t| t.name.to_string()).collect(),
            start_time: info.start_time,
            total_duration_seconds: info.total_duration_seconds,
            planned_duration_seconds: info.planned_duration_seconds,
            stage_count: info.stage_count,
            shape_issues: info.shape_issues,
            thresholds: info.thresholds,
        },
        overall_statistics,
        error_analysis,
        stage_by_stage_metrics: StageRecords(records),
        per_service_metrics: ServiceRecords(services),
        capacity_analysis: verdict,
        recommendations,
        validation,
    }
}

/// `(success_rate, error_rate)` in percent, zero when nothing completed.
fn rates(stats: &CumulativeSnapshot) -> (f64, f64) {
    if stats.requests == 0 {
        return (0.0, 0.0);
    }
    let total = stats.requests as f64;
    (
        stats.successes() as f64 / total * 100.0,
        stats.failures.min(stats.requests) as f64 / total * 100.0,
    )
}

fn validate(
    overall: &CumulativeSnapshot,
    records: &[StageMetricRecord],
    tally: &ErrorTally,
) -> Validation {
    let stage_total: u64 = records.iter().map(|r| r.requests).sum();
    let discrepancy = i64::try_from(stage_total)
        .unwrap_or(i64::MAX)
        .saturating_sub(i64::try_from(overall.requests).unwrap_or(i64::MAX));

    let mut note = if discrepancy == 0 {
        "Stage totals match overall statistics.".to_string()
    } else {
        tracing::warn!(
            stage_total,
            overall = overall.requests,
            discrepancy,
            "stage totals disagree with overall statistics"
        );
        format!(
            "Stage totals differ from overall statistics by {discrepancy}; requests completing \
             outside any stage window account for the gap. Overall statistics are authoritative."
        )
    };
    note.push_str(" Stage latency figures are the cumulative distribution at stage end.");

    Validation {
        total_requests: overall.requests,
        stage_total_requests: stage_total,
        discrepancy,
        late_events: tally.late_events,
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::test_support::record;
    use std::time::Duration;

    fn info() -> RunInfo {
        RunInfo {
            service: "diarization".to_string(),
            target: Some("http://127.0.0.1:9/infer".to_string()),
            start_time: SystemTime::UNIX_EPOCH + Duration::from_secs(86_400),
            total_duration_seconds: 100.0,
            planned_duration_seconds: 120.0,
            stage_count: 2,
            shape_issues: Vec::new(),
            thresholds: CapacityThresholds::default(),
        }
    }

    fn overall(requests: u64, failures: u64) -> CumulativeSnapshot {
        CumulativeSnapshot {
            requests,
            failures,
            ..CumulativeSnapshot::default()
        }
    }

    fn tally() -> ErrorTally {
        let mut global = BTreeMap::new();
        for (code, n) in [("HTTP_500", 3), ("HTTP_503", 9), ("EXCEPTION:TIMEOUT", 1)] {
            global.insert(code.to_string(), n);
        }
        ErrorTally {
            global,
            late_events: 2,
            ..ErrorTally::default()
        }
    }

    #[test]
    fn discrepancy_is_surfaced_not_raised() {
        let records = vec![
            record(0, "S1 (5 users)", 40, 0.0, 100.0),
            record(1, "S2 (10 users)", 55, 0.0, 100.0),
        ];
        let t = tally();
        let verdict = analyze(&records, &[], &CapacityThresholds::default());
        let report = assemble(info(), &overall(100, 13), &[], records, &t, verdict);

        assert_eq!(report.validation.total_requests, 100);
        assert_eq!(report.validation.stage_total_requests, 95);
        assert_eq!(report.validation.discrepancy, -5);
        assert_eq!(report.validation.late_events, 2);
        assert!(report.validation.note.contains("authoritative"));
        assert!((report.overall_statistics.requests_per_second - 1.0).abs() < 1e-9);
        assert!((report.overall_statistics.error_rate - 13.0).abs() < 1e-9);
    }

    #[test]
    fn matching_totals_have_zero_discrepancy() {
        let records = vec![record(0, "S1 (5 users)", 10, 0.0, 100.0)];
        let verdict = analyze(&records, &[], &CapacityThresholds::default());
        let report = assemble(info(), &overall(10, 0), &[], records, &ErrorTally::default(), verdict);
        assert_eq!(report.validation.discrepancy, 0);
        assert_eq!(report.error_analysis.total_errors, 0);
        assert!(report.error_analysis.top_errors.is_empty());
    }

    #[test]
    fn errors_are_ranked() {
        let records = vec![record(0, "S1 (5 users)", 10, 0.0, 100.0)];
        let verdict = analyze(&records, &[], &CapacityThresholds::default());
        let report = assemble(info(), &overall(10, 0), &[], records, &tally(), verdict);

        let codes: Vec<&str> = report
            .error_analysis
            .distribution
            .iter()
            .map(|e| e.code.as_str())
            .collect();
        assert_eq!(codes, ["HTTP_503", "HTTP_500", "EXCEPTION:TIMEOUT"]);
        assert_eq!(report.error_analysis.total_errors, 13);
    }

    #[test]
    fn json_keeps_stage_order_and_unique_keys() {
        let records = vec![
            record(0, "Zeta (5 users)", 10, 0.0, 100.0),
            record(1, "Alpha (10 users)", 10, 0.0, 100.0),
            record(2, "Zeta (5 users)", 10, 0.0, 100.0),
        ];
        let verdict = analyze(&records, &[], &CapacityThresholds::default());
        let report = assemble(info(), &overall(30, 0), &[], records, &ErrorTally::default(), verdict);

        let json = serde_json::to_string(&report).unwrap_or_else(|e| panic!("{e}"));
        let zeta = json.find("\"Zeta (5 users)\":").unwrap_or(usize::MAX);
        let alpha = json.find("\"Alpha (10 users)\":").unwrap_or(usize::MAX);
        let dup = json.find("\"Zeta (5 users) #3\":").unwrap_or(usize::MAX);
        assert!(zeta < alpha && alpha < dup, "{json}");

        let v: serde_json::Value = serde_json::from_str(&json).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v["test_info"]["test_type"], "load_shaping");
        assert_eq!(v["test_info"]["start_time"], "1970-01-02T00:00:00.000Z");
        assert!(v.get("per_service_metrics").is_none(), "{json}");
        assert!(v["test_info"].get("services").is_none(), "{json}");
        for section in [
            "overall_statistics",
            "error_analysis",
            "stage_by_stage_metrics",
            "capacity_analysis",
            "recommendations",
            "validation",
        ] {
            assert!(v.get(section).is_some(), "missing {section}");
        }
    }

    #[test]
    fn generated_stage_keys_never_collide_with_real_labels() {
        let records = vec![
            record(0, "A (5 users)", 10, 0.0, 100.0),
            record(1, "A (5 users)", 10, 0.0, 100.0),
            record(2, "A (5 users) #2", 10, 0.0, 100.0),
        ];
        let verdict = analyze(&records, &[], &CapacityThresholds::default());
        let report = assemble(info(), &overall(30, 0), &[], records, &ErrorTally::default(), verdict);

        let json = serde_json::to_string(&report.stage_by_stage_metrics)
            .unwrap_or_else(|e| panic!("{e}"));
        let stages: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&json).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(stages.len(), 3, "{json}");
        assert!(stages.contains_key("A (5 users)"));
        assert!(stages.contains_key("A (5 users) #2"));
        assert!(stages.contains_key("A (5 users) #2 #3"));
    }

    #[test]
    fn services_are_reported_per_target() {
        let records = vec![record(0, "S1 (5 users)", 30, 0.0, 100.0)];
        let targets = [
            TargetSnapshot {
                name: "asr".into(),
                stats: overall(20, 5),
            },
            TargetSnapshot {
                name: "nmt".into(),
                stats: overall(10, 0),
            },
            TargetSnapshot {
                name: "tts".into(),
                stats: overall(0, 0),
            },
        ];
        let mut t = ErrorTally::default();
        let mut errors = BTreeMap::new();
        errors.insert("HTTP_503".to_string(), 4);
        errors.insert("EXCEPTION:TIMEOUT".to_string(), 1);
        t.per_target.push(TargetErrorTally {
            name: "asr".to_string(),
            events: 20,
            failures: 5,
            errors,
            payload: None,
        });

        let verdict = analyze(&records, &[], &CapacityThresholds::default());
        let report = assemble(info(), &overall(30, 5), &targets, records, &t, verdict);

        let names: Vec<&str> = report.per_service_metrics.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["asr", "nmt"]);
        assert_eq!(report.test_info.services, ["asr", "nmt", "tts"]);

        let asr = &report.per_service_metrics.0[0];
        assert!((asr.error_rate - 25.0).abs() < 1e-9);
        assert!((asr.requests_per_second - 0.2).abs() < 1e-9);
        assert_eq!(asr.top_errors[0].code, "HTTP_503");
        assert!(report.per_service_metrics.0[1].error_codes.is_empty());

        let v = serde_json::to_value(&report).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v["per_service_metrics"]["asr"]["failed_requests"], 5);
        assert!(v["per_service_metrics"]["asr"].get("name").is_none());
        assert!(v["per_service_metrics"].get("tts").is_none());
    }
}
