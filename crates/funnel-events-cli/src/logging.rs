use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Installs the stderr `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` when set. Installing twice is a no-op so the
/// CLI can be driven repeatedly from one process.
///
/// # Errors
/// Returns an error when `level` is not a valid filter directive.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|err| anyhow!("invalid RUST_LOG filter: {err}"))?,
        _ => EnvFilter::try_new(level)
            .map_err(|err| anyhow!("invalid LOG_LEVEL {level:?}: {err}"))?,
    };

    // A subscriber may already be installed by an earlier call.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    Ok(())
}
