use serde::Serialize;

use crate::analyzer::CapacityVerdict;
use crate::differencer::StageMetricRecord;
use crate::thresholds::CapacityThresholds;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendations {
    pub production_capacity: String,
    pub recommended_capacity: Option<u64>,
    pub scaling_needed: bool,
    pub urgent: bool,
    pub optimization_priority: Vec<String>,
    pub action_items: Vec<String>,
}

pub fn recommend(
    verdict: &CapacityVerdict,
    records: &[StageMetricRecord],
    thresholds: &CapacityThresholds,
) -> Recommendations {
    let mut out = Recommendations::default();

    match (verdict.max_healthy_capacity, verdict.recommended_capacity) {
        (Some(max), Some(recommended)) if max > 0 => {
            let pct = (thresholds.safety_factor * 100.0).round();
            out.production_capacity =
                format!("{recommended} concurrent users ({pct}% of max tested: {max})");
            out.recommended_capacity = Some(recommended);
            out.action_items.push(format!(
                "Set production max concurrent users to {recommended}"
            ));
        }
        _ => {
            out.production_capacity =
                "Server cannot handle load - immediate attention required".to_string();
            out.scaling_needed = true;
            out.urgent = true;
            out.action_items.push(
                "URGENT: Server fails under minimal tested load - investigate immediately"
                    .to_string(),
            );
        }
    }

    if !verdict.failed_stages.is_empty() {
        out.optimization_priority
            .push("High error rates detected - investigate server logs".to_string());
    }

    if let Some(slow) = records
        .iter()
        .find(|r| r.requests > 0 && r.latency.p99 > thresholds.p99_alert_ms)
    {
        out.optimization_priority.push(format!(
            "High P99 latency in {} - optimize response time",
            slow.label
        ));
    }

    if !verdict.excluded_stages.is_empty() {
        out.action_items.push(format!(
            "Fix {} malformed stage definition(s); they were left out of the capacity analysis",
            verdict.excluded_stages.len()
        ));
    }

    if out.optimization_priority.is_empty() {
        out.optimization_priority
            .push("System performing well within tested range".to_string());
    }

    out
}
