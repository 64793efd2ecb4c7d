use anyhow::Context as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rampr_core::{EventTally, Report, RunInfo, StagePlan, analyze, assemble};
use rampr_metrics::{CumulativeSource as _, StatsStore};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::harness::{self, HarnessConfig};
use crate::output;
use crate::run_error::RunError;
use crate::shape_file;
use crate::target::TargetSet;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let shape = shape_file::load(&args.shape)
        .await
        .and_then(|f| f.resolve(&args.shape, args.preset, args.url.as_deref()))
        .map_err(RunError::InvalidInput)?;
    let plan = StagePlan::new(shape.stages.clone())
        .with_context(|| format!("invalid shape `{}`", shape.name))
        .map_err(RunError::InvalidInput)?;
    let specs = shape.target_specs().map_err(RunError::InvalidInput)?;
    let think_time = shape.think_time().map_err(RunError::InvalidInput)?;
    let targets = TargetSet::load(&specs, think_time)
        .await
        .map(Arc::new)
        .map_err(RunError::InvalidInput)?;
    let names = targets.names();

    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("failed to create output dir: {}", args.out.display()))
        .map_err(RunError::RuntimeError)?;

    let out = output::formatter(args.output);
    let described = shape.describe_target();
    out.print_header(&shape.name, &described, &plan);
    tracing::info!(
        shape = %shape.name,
        target = %described,
        stages = plan.len(),
        targets = targets.len(),
        max_users = plan.max_concurrency(),
        "starting load shape"
    );

    let issues = plan.issues().to_vec();
    let stage_count = plan.len();
    let planned_duration_seconds = plan.total_duration_seconds();

    let tally = Arc::new(EventTally::with_targets(
        shape.payload_metric(),
        names.iter().cloned(),
    ));
    let store = Arc::new(StatsStore::with_targets(names.iter().cloned()));

    let outcome = harness::run(
        plan,
        targets.clone(),
        tally.clone(),
        store.clone(),
        HarnessConfig {
            tick: args.tick,
            grace: args.grace,
        },
        out.as_ref(),
    )
    .await;

    if outcome.interrupted {
        tracing::warn!(
            stages = outcome.records.len(),
            "run interrupted; reporting the stages reached"
        );
    }
    if outcome.unfinished_vus > 0 {
        tracing::warn!(
            unfinished = outcome.unfinished_vus,
            "some requests never completed and are missing from the report"
        );
    }

    let overall = store.snapshot();
    let errors = tally.snapshot();
    let verdict = analyze(&outcome.records, &issues, &shape.thresholds);
    let exit = ExitCode::from_verdict(&verdict);

    let report = assemble(
        RunInfo {
            service: shape.name.clone(),
            target: (targets.len() == 1).then(|| targets.get(0).url.clone()),
            start_time: outcome.started_at,
            total_duration_seconds: outcome.elapsed.as_secs_f64(),
            planned_duration_seconds,
            stage_count,
            shape_issues: issues,
            thresholds: shape.thresholds,
        },
        &overall,
        &store.target_snapshots(),
        outcome.records,
        &errors,
        verdict,
    );

    let path = report_path(&args.out, &shape.name, outcome.started_at);
    write_report(&path, &report)
        .await
        .map_err(RunError::RuntimeError)?;
    tracing::info!(path = %path.display(), "report written");

    out.print_report(&report, &path)
        .map_err(RunError::RuntimeError)?;

    Ok(exit)
}

async fn write_report(path: &Path, report: &Report) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(report).context("failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write report: {}", path.display()))
}

/// `<dir>/<name>_load_shape_results_<YYYYmmdd_HHMMSS>.json`, timestamp in UTC.
pub(crate) fn report_path(dir: &Path, name: &str, started_at: SystemTime) -> PathBuf {
    dir.join(format!(
        "{}_load_shape_results_{}.json",
        file_stem(name),
        file_timestamp(started_at)
    ))
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "shape".to_string()
    } else {
        stem
    }
}

fn file_timestamp(t: SystemTime) -> String {
    let digits: String = humantime::format_rfc3339_seconds(t)
        .to_string()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let (date, time) = digits.split_at(digits.len().min(8));
    format!("{date}_{time}")
}
