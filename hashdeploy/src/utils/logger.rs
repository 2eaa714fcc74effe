//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over `level` when it is set. Logs go to
/// stderr so stdout stays free for the JSON report.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}

/// Pick the effective log level from the CLI switches and the configured level.
pub fn effective_level<'a>(configured: &'a str, quiet: bool, verbose: bool) -> &'a str {
    if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        configured
    }
}
