use std::fmt::Write as _;

use anyhow::Context as _;
use rampr_core::{Preset, StagePlan, extract_concurrency};
use strum::IntoEnumIterator as _;

use crate::cli::CheckArgs;
use crate::exit_codes::ExitCode;
use crate::run_error::RunError;
use crate::shape_file::{self, LoadShape};

/// Validates a shape file and prints its stage table. Never sends traffic.
pub async fn check(args: CheckArgs) -> Result<ExitCode, RunError> {
    let shape = shape_file::load(&args.shape)
        .await
        .and_then(|f| f.resolve(&args.shape, args.preset, None))
        .map_err(RunError::InvalidInput)?;
    let plan = StagePlan::new(shape.stages.clone())
        .with_context(|| format!("invalid shape `{}`", shape.name))
        .map_err(RunError::InvalidInput)?;

    print!("{}", render(&shape, &plan));

    if plan.issues().is_empty() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::InvalidInput)
    }
}

/// Prints every built-in shape with its stage list.
pub fn presets() -> ExitCode {
    print!("{}", render_presets());
    ExitCode::Success
}

fn render_presets() -> String {
    let mut out = String::new();
    for preset in Preset::iter() {
        let stages = preset.stages();
        let total = stages.last().map_or(0.0, |s| s.end_offset_seconds);
        writeln!(&mut out, "{preset} ({} stages, {total}s)", stages.len()).ok();
        for s in &stages {
            writeln!(
                &mut out,
                "  until {:>5}s  users={:<3} ramp={:<4} {}",
                s.end_offset_seconds, s.target_concurrency, s.ramp_rate, s.label
            )
            .ok();
        }
        out.push('\n');
    }
    out
}

fn render(shape: &LoadShape, plan: &StagePlan) -> String {
    let mut out = String::new();
    writeln!(&mut out, "shape: {}", shape.name).ok();
    writeln!(&mut out, "target: {}", shape.describe_target()).ok();
    if !shape.targets.is_empty() {
        match shape.target_specs() {
            Ok(specs) => {
                for spec in specs {
                    writeln!(
                        &mut out,
                        "  - {:<16} {} {}",
                        spec.name.as_deref().unwrap_or("-"),
                        spec.method,
                        spec.url
                    )
                    .ok();
                }
            }
            Err(err) => {
                writeln!(&mut out, "  unresolved: {err:#}").ok();
            }
        }
    }
    writeln!(
        &mut out,
        "duration: {}s, max users: {}",
        plan.total_duration_seconds(),
        plan.max_concurrency()
    )
    .ok();

    out.push_str("\n  #  window            users  ramp   sized  label\n");
    for (idx, stage) in plan.stages().iter().enumerate() {
        let window = plan
            .window(idx)
            .map_or_else(|| "-".to_string(), |(s, e)| format!("{s}s..{e}s"));
        let sized = extract_concurrency(&stage.label)
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        writeln!(
            &mut out,
            "  {:<2} {:<17} {:<6} {:<6} {:<6} {}{}",
            idx + 1,
            window,
            stage.target_concurrency,
            stage.ramp_rate,
            sized,
            stage.label,
            if plan.is_quarantined(idx) { " [quarantined]" } else { "" }
        )
        .ok();
    }

    if plan.issues().is_empty() {
        out.push_str("\nok: no issues\n");
    } else {
        out.push_str("\nissues\n");
        for issue in plan.issues() {
            writeln!(&mut out, "  - {issue}").ok();
        }
    }
    out
}
