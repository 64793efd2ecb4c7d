use std::io::Write as _;
use std::path::Path;

use rampr_core::{Report, StageMetricRecord, StagePlan};

use super::OutputFormatter;
use crate::harness::ProgressUpdate;

/// Keeps stdout for the final report only; progress goes to the log.
pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _name: &str, _target: &str, _plan: &StagePlan) {}

    fn progress(&self, _update: &ProgressUpdate<'_>) {}

    fn stage_finished(&self, _record: &StageMetricRecord) {}

    fn print_report(&self, report: &Report, _saved_to: &Path) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, report)?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }
}
