use serde::Serialize;

use crate::differencer::StageMetricRecord;
use crate::shape::PlanIssue;
use crate::thresholds::CapacityThresholds;

/// Parses the concurrency out of a label such as `"Stage 3: Light Stress (10 users)"`.
pub fn extract_concurrency(label: &str) -> Option<u64> {
    label.match_indices('(').find_map(|(pos, _)| {
        let rest = &label[pos + 1..];
        let digits_end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| i);
        if digits_end == 0 || !rest[digits_end..].starts_with(" users)") {
            return None;
        }
        rest[..digits_end].parse().ok()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StageHealth {
    Healthy,
    Degraded,
    Failed,
}

impl StageHealth {
    pub fn classify(error_rate: f64, p95_ms: f64, t: &CapacityThresholds) -> Self {
        if error_rate < t.healthy_error_pct && p95_ms < t.healthy_latency_ms {
            Self::Healthy
        } else if error_rate < t.degraded_error_pct && p95_ms < t.degraded_latency_ms {
            Self::Degraded
        } else {
            Self::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub index: usize,
    pub concurrency: Option<u64>,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedStage {
    pub stage: String,
    pub index: usize,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapacityVerdict {
    pub healthy_stages: Vec<StageSummary>,
    pub degraded_stages: Vec<StageSummary>,
    pub failed_stages: Vec<StageSummary>,
    pub breaking_point: Option<String>,
    pub max_healthy_capacity: Option<u64>,
    pub recommended_capacity: Option<u64>,
    /// Stages with a malformed definition; reported but kept out of the capacity math.
    pub excluded_stages: Vec<ExcludedStage>,
    /// Stages that completed no requests.
    pub unmeasured_stages: Vec<String>,
    /// Caveats a reader needs to interpret the classification.
    pub notes: Vec<String>,
}

impl CapacityVerdict {
    /// No stage was healthy at a known concurrency.
    pub fn is_urgent(&self) -> bool {
        self.max_healthy_capacity.unwrap_or(0) == 0
    }

    pub fn health_of(&self, label: &str) -> Option<StageHealth> {
        let has = |v: &[StageSummary]| v.iter().any(|s| s.stage == label);
        if has(&self.healthy_stages) {
            Some(StageHealth::Healthy)
        } else if has(&self.degraded_stages) {
            Some(StageHealth::Degraded)
        } else if has(&self.failed_stages) {
            Some(StageHealth::Failed)
        } else {
            None
        }
    }
}

/// Classifies every measured stage in order and derives the breaking point and capacity.
pub fn analyze(
    records: &[StageMetricRecord],
    issues: &[PlanIssue],
    thresholds: &CapacityThresholds,
) -> CapacityVerdict {
    let mut verdict = CapacityVerdict::default();

    for record in records {
        if record.quarantined {
            let reasons = issues
                .iter()
                .filter(|i| i.index() == record.index)
                .map(ToString::to_string)
                .collect();
            verdict.excluded_stages.push(ExcludedStage {
                stage: record.label.clone(),
                index: record.index,
                reasons,
            });
            continue;
        }
        if record.requests == 0 {
            verdict.unmeasured_stages.push(record.label.clone());
            continue;
        }

        let concurrency = extract_concurrency(&record.label);
        let summary = StageSummary {
            stage: record.label.clone(),
            index: record.index,
            concurrency,
            error_rate: record.error_rate,
            avg_latency_ms: record.latency.avg,
            p95_latency_ms: record.latency.p95,
        };

        match StageHealth::classify(record.error_rate, record.latency.p95, thresholds) {
            StageHealth::Healthy => {
                if let Some(n) = concurrency {
                    verdict.max_healthy_capacity =
                        Some(verdict.max_healthy_capacity.map_or(n, |m| m.max(n)));
                }
                verdict.healthy_stages.push(summary);
            }
            StageHealth::Degraded => {
                verdict
                    .breaking_point
                    .get_or_insert_with(|| record.label.clone());
                verdict.degraded_stages.push(summary);
            }
            StageHealth::Failed => {
                verdict
                    .breaking_point
                    .get_or_insert_with(|| record.label.clone());
                verdict.failed_stages.push(summary);
            }
        }
    }

    if !verdict.unmeasured_stages.is_empty() {
        verdict.notes.push(format!(
            "{} stage(s) completed no requests and were not classified: {}. A silent stage is \
             not evidence of health and can never be the breaking point.",
            verdict.unmeasured_stages.len(),
            verdict.unmeasured_stages.join(", ")
        ));
    }

    verdict.recommended_capacity = verdict
        .max_healthy_capacity
        .filter(|&n| n > 0)
        .map(|n| (n as f64 * thresholds.safety_factor).floor() as u64);

    tracing::debug!(
        healthy = verdict.healthy_stages.len(),
        degraded = verdict.degraded_stages.len(),
        failed = verdict.failed_stages.len(),
        breaking_point = verdict.breaking_point.as_deref(),
        max_healthy_capacity = verdict.max_healthy_capacity,
        "capacity analyzed"
    );

    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;

    fn strict() -> CapacityThresholds {
        CapacityThresholds {
            healthy_error_pct: 5.0,
            healthy_latency_ms: 5_000.0,
            ..CapacityThresholds::default()
        }
    }

    #[test]
    fn extracts_user_counts() {
        assert_eq!(extract_concurrency("Stage 1: Warm-up (5 users)"), Some(5));
        assert_eq!(extract_concurrency("Hold (a) (120 users)"), Some(120));
        assert_eq!(extract_concurrency("Stage 1 Hold"), None);
        assert_eq!(extract_concurrency("Rapid (users)"), None);
        assert_eq!(extract_concurrency("Rapid (5 workers)"), None);
        assert_eq!(extract_concurrency("(99999999999999999999999 users)"), None);
    }

    #[test]
    fn healthy_then_failed_sets_capacity_and_breaking_point() {
        let records = [
            record(0, "Step (20 users)", 100, 1.0, 2_000.0),
            record(1, "Step (30 users)", 100, 60.0, 2_000.0),
        ];
        let v = analyze(&records, &[], &strict());

        assert_eq!(v.healthy_stages.len(), 1);
        assert_eq!(v.failed_stages.len(), 1);
        assert_eq!(v.max_healthy_capacity, Some(20));
        assert_eq!(v.breaking_point.as_deref(), Some("Step (30 users)"));
        assert_eq!(v.recommended_capacity, Some(14));
        assert!(!v.is_urgent());
        assert_eq!(v.health_of("Step (30 users)"), Some(StageHealth::Failed));
        assert!(v.notes.is_empty());
    }

    #[test]
    fn first_unhealthy_stage_is_the_breaking_point() {
        let records = [
            record(0, "A (5 users)", 100, 0.0, 1_000.0),
            record(1, "B (10 users)", 100, 3.0, 40_000.0),
            record(2, "C (20 users)", 100, 50.0, 90_000.0),
            record(3, "D (5 users)", 100, 0.0, 1_000.0),
        ];
        let v = analyze(&records, &[], &CapacityThresholds::default());
        assert_eq!(v.breaking_point.as_deref(), Some("B (10 users)"));
        assert_eq!(v.degraded_stages.len(), 1);
        assert_eq!(v.failed_stages.len(), 1);
        assert_eq!(v.max_healthy_capacity, Some(5));
        assert_eq!(v.recommended_capacity, Some(3));
    }

    #[test]
    fn label_without_users_is_classified_but_not_sized() {
        let records = [
            record(0, "Stage 1 Hold", 100, 0.0, 1_000.0),
            record(1, "Stage 2 Hold", 100, 20.0, 1_000.0),
        ];
        let v = analyze(&records, &[], &CapacityThresholds::default());
        assert_eq!(v.healthy_stages.len(), 1);
        assert_eq!(v.healthy_stages[0].concurrency, None);
        assert_eq!(v.max_healthy_capacity, None);
        assert_eq!(v.recommended_capacity, None);
        assert_eq!(v.breaking_point.as_deref(), Some("Stage 2 Hold"));
        assert!(v.is_urgent());
    }

    #[test]
    fn quarantined_and_empty_stages_stay_out_of_the_math() {
        let mut bad = record(1, "Bad (50 users)", 100, 0.0, 1_000.0);
        bad.quarantined = true;
        let issues = [PlanIssue::NonPositiveRampRate {
            index: 1,
            label: "Bad (50 users)".to_string(),
            ramp_rate: 0.0,
        }];
        let records = [
            record(0, "Ok (5 users)", 100, 0.0, 1_000.0),
            bad,
            record(2, "Idle (80 users)", 0, 0.0, 0.0),
        ];

        let v = analyze(&records, &issues, &CapacityThresholds::default());
        assert_eq!(v.max_healthy_capacity, Some(5));
        assert_eq!(v.excluded_stages.len(), 1);
        assert_eq!(v.excluded_stages[0].reasons.len(), 1);
        assert_eq!(v.unmeasured_stages, ["Idle (80 users)"]);
        assert_eq!(v.health_of("Bad (50 users)"), None);
        assert_eq!(v.health_of("Idle (80 users)"), None);
        assert_eq!(v.breaking_point, None);
        assert_eq!(v.notes.len(), 1);
        assert!(v.notes[0].contains("Idle (80 users)"), "{:?}", v.notes);
        assert!(v.notes[0].contains("not evidence of health"), "{:?}", v.notes);
    }

    #[test]
    fn all_failed_is_urgent() {
        let records = [record(0, "Min (1 users)", 10, 100.0, 500.0)];
        let v = analyze(&records, &[], &CapacityThresholds::default());
        assert!(v.is_urgent());
        assert_eq!(v.recommended_capacity, None);
        assert_eq!(v.breaking_point.as_deref(), Some("Min (1 users)"));
    }
}
