use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use rampr_core::Preset;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 1s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!("invalid duration '{s}' (expected e.g. 1s, 250ms, 1m)"));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 1s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!("invalid duration '{s}' (expected e.g. 1s, 250ms, 1m)")),
    }
}

fn parse_tick(input: &str) -> Result<Duration, String> {
    let d = parse_duration(input)?;
    if d.is_zero() {
        return Err("tick interval must be greater than zero".to_string());
    }
    Ok(d)
}

fn parse_preset(input: &str) -> Result<Preset, String> {
    input.parse().map_err(|_| {
        format!("unknown preset '{input}' (expected standard, conservative or aggressive)")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar, stage lines and a readable summary.
    HumanReadable,
    /// Print the final report as JSON to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rampr",
    author,
    version,
    about = "Progressive load-shape capacity testing for HTTP inference services",
    long_about = "rampr drives a staged load shape against an HTTP endpoint, measures every stage, and reports the concurrency at which the service degrades together with a recommended production ceiling.\n\nA shape file (YAML) names the target request, the stages and the health thresholds.",
    after_help = "Examples:\n  rampr run shapes/diarization.yaml\n  rampr run shapes/diarization.yaml --preset conservative --out results/\n  rampr run shapes/diarization.yaml --url http://127.0.0.1:8000/infer --output json\n  rampr check shapes/diarization.yaml\n  rampr presets"
)]
pub struct Cli {
    /// Log filter (e.g. info, debug, rampr_core=trace). Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load shape against the target and write a capacity report
    #[command(
        long_about = "Run the shape's stages in order, finalize one record per stage, then analyze capacity.\n\nCLI flags override values from the shape file."
    )]
    Run(RunArgs),

    /// Validate a shape file without sending any traffic
    Check(CheckArgs),

    /// List the built-in load shapes
    Presets,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the shape file (.yaml/.yml/.json)
    pub shape: PathBuf,

    /// Target URL (overrides `target.url`)
    #[arg(long, env = "RAMPR_TARGET_URL")]
    pub url: Option<String>,

    /// Use a built-in stage list instead of the file's `preset`/`stages`
    #[arg(long, value_parser = parse_preset)]
    pub preset: Option<Preset>,

    /// Scheduler tick interval
    #[arg(long, value_parser = parse_tick, default_value = "1s")]
    pub tick: Duration,

    /// How long to wait for in-flight requests after the shape ends
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    pub grace: Duration,

    /// Directory for the JSON report file
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the shape file (.yaml/.yml/.json)
    pub shape: PathBuf,

    /// Use a built-in stage list instead of the file's `preset`/`stages`
    #[arg(long, value_parser = parse_preset)]
    pub preset: Option<Preset>,
}
