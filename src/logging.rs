use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "psalter=info";

/// Log to a daily file under `log_dir`, and to stderr for warnings and errors
/// (everything when `verbose`).
///
/// Keep the returned guard alive for the life of the process; dropping it
/// stops the file writer.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir).with_context(|| format!("Failed to create {}", log_dir.display()))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "psalter.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) if verbose => EnvFilter::new("psalter=debug"),
    Err(_) => EnvFilter::new(DEFAULT_FILTER),
  };
  let stderr_level = if verbose { Level::TRACE } else { Level::WARN };

  let subscriber = tracing_subscriber::fmt()
    .with_writer(file_writer.and(std::io::stderr.with_max_level(stderr_level)))
    .with_target(false)
    .with_ansi(false)
    .with_env_filter(filter)
    .finish();
  tracing::subscriber::set_global_default(subscriber).context("Failed to install tracing subscriber")?;

  Ok(guard)
}
