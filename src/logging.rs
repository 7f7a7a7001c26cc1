use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::{data_dir, LogConfig};

/// Install the global tracing subscriber.
///
/// RUST_LOG takes precedence over `log.level`. Output goes to
/// `posync.log` in the data directory unless `log.stderr` is set. Keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

  let (writer, guard) = if config.stderr {
    tracing_appender::non_blocking(std::io::stderr())
  } else {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "posync.log"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(config.stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to init logging: {}", e))?;

  Ok(guard)
}
