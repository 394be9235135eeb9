//! Tracing subscriber setup.
//!
//! The engine itself only emits `tracing` events; hosts decide whether to
//! install a subscriber. `init` builds the same layered registry the
//! engine's binaries and tests use: an `EnvFilter` (honouring `RUST_LOG`),
//! a console fmt layer, and an optional non-blocking file layer.

use crate::config::LoggingConfig;
use crate::error::{EngineError, Result, ResultExt};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber described by `config`.
///
/// Returns the file appender guard when a log file is configured; dropping
/// it flushes and stops the background writer. Fails if a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;
    let console = tracing_subscriber::fmt::layer().with_thread_names(config.thread_names);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().ok_or_else(|| {
                EngineError::Config(format!("Log path {} has no file name", path.display()))
            })?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(config.thread_names)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| EngineError::Config(format!("Failed to install subscriber: {}", e)))?;

    tracing::debug!("Logging initialized (filter: {})", config.filter);
    Ok(guard)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            EngineError::Config(format!("Invalid log filter '{}': {}", config.filter, e))
        }),
    }
}
