use std::io;
use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Install the global subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. Events go to stderr
/// so command output on stdout stays clean; with `log_dir` set they are also
/// written to a daily rolling file. Keep the returned guard alive until exit
/// or buffered file lines are lost.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::INFO.into())
    .from_env()
    .map_err(|e| eyre!("Failed to read RUST_LOG: {}", e))?;

  let stderr = fmt::layer().compact().with_writer(io::stderr);

  let (file, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "replay-cache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  Registry::default()
    .with(filter)
    .with(stderr)
    .with(file)
    .try_init()
    .map_err(|e| eyre!("Failed to set the global tracing subscriber: {}", e))?;

  Ok(guard)
}
