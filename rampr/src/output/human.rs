use std::path::Path;

use rampr_core::{Report, StageMetricRecord, StagePlan, extract_concurrency};

use super::OutputFormatter;
use crate::harness::ProgressUpdate;

mod format;
mod progress;
mod summary;

use format::{format_latency_ms, format_pct, format_rate, format_seconds};
use progress::HumanProgress;
use summary::render;

pub(crate) struct HumanReadableOutput {
    progress: HumanProgress,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: HumanProgress::new(),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, name: &str, target: &str, plan: &StagePlan) {
        eprintln!("shape: {name}");
        eprintln!("target: {target}");
        eprintln!(
            "stages: {} over {} (max {} users)",
            plan.len(),
            format_seconds(plan.total_duration_seconds()),
            plan.max_concurrency()
        );
        for issue in plan.issues() {
            eprintln!("  warning: {issue}");
        }
        for (idx, stage) in plan.stages().iter().enumerate() {
            if extract_concurrency(&stage.label).is_none() {
                eprintln!(
                    "  note: `{}` has no `(N users)` in its label; it is classified but not sized",
                    stage.label
                );
            }
            tracing::debug!(
                index = idx,
                stage = %stage.label,
                end_offset = stage.end_offset_seconds,
                "planned stage"
            );
        }
        eprintln!();
    }

    fn progress(&self, u: &ProgressUpdate<'_>) {
        let error_rate = if u.requests > 0 {
            u.failures as f64 / u.requests as f64 * 100.0
        } else {
            0.0
        };
        let message = format!(
            "{} users={}/{} requests={} errors={}",
            u.stage.unwrap_or("-"),
            u.active_users,
            u.target_users,
            u.requests,
            format_pct(error_rate)
        );
        self.progress.update(u.planned, u.elapsed, message);
    }

    fn stage_finished(&self, r: &StageMetricRecord) {
        let line = if r.skipped {
            format!("skipped  {} (elapsed between ticks)", r.label)
        } else {
            format!(
                "finished {}: requests={} rps={} errors={} p95={}{}",
                r.label,
                r.requests,
                format_rate(r.throughput_rps),
                format_pct(r.error_rate),
                format_latency_ms(r.latency.p95),
                if r.quarantined { " [quarantined]" } else { "" }
            )
        };
        self.progress.println(line);
    }

    fn print_report(&self, report: &Report, saved_to: &Path) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report, saved_to));
        Ok(())
    }
}
