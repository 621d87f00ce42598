//! Log output for device processes
//!
//! Components never write to a shared stream directly: the device runtime
//! and each channel own a `tracing` span and log inside it. This module only
//! installs the process-wide subscriber that renders those events.

use crate::error::{FerError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,fer=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `filter`. With `log_file`, events are
/// written to that file through a background writer; keep the returned guard
/// alive until exit or buffered lines are lost.
pub fn init_logging(filter: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(filter)
            .map_err(|e| FerError::Config(format!("invalid log filter {:?}: {}", filter, e)))
    })?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| FerError::Config(format!("invalid log file {:?}", path)))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let stdout_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_thread_names(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| FerError::Config(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}
