use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "warn";

/// Installs a stderr `fmt` subscriber. `level` wins over `RUST_LOG`.
pub fn init(level: Option<&str>) -> anyhow::Result<()> {
  let filter = match level {
    Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{}'", level))?,
    None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(filter)
    .try_init()
    .context("failed to install the tracing subscriber")
}
