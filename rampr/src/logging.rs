use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber.
pub(crate) fn init(cli_filter: Option<&str>, default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(cli_filter, default_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Precedence: `--log-level`, then `RUST_LOG`, then `default_filter`. Unparseable
/// filters fall through to the default.
fn filter(cli_filter: Option<&str>, default_filter: &str) -> EnvFilter {
    match cli_filter {
        Some(f) => EnvFilter::try_new(f).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new(default_filter))
}
