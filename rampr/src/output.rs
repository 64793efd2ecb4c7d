use crate::cli::OutputFormat;
use crate::harness::ProgressUpdate;
use rampr_core::{Report, StageMetricRecord, StagePlan};
use std::path::Path;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, name: &str, target: &str, plan: &StagePlan);
    fn progress(&self, update: &ProgressUpdate<'_>);
    fn stage_finished(&self, record: &StageMetricRecord);
    fn print_report(&self, report: &Report, saved_to: &Path) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
