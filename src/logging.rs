//! Logger construction
//!
//! The subscriber is built from [`LoggingConfig`] and installed as the
//! default for the current thread only, through the guard returned by
//! [`install`]. Nothing registers a process-wide logger.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

use crate::config::{ConfigError, LoggingConfig};

/// Console layer writing to `writer`, plus a file layer when `log_to_file` is set
pub fn subscriber<W>(config: &LoggingConfig, writer: W) -> Result<impl Subscriber + Send + Sync, ConfigError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let file_layer = if config.log_to_file {
        if config.log_file_path.trim().is_empty() {
            return Err(ConfigError::MissingLogFilePath);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file_path)
            .map_err(|source| ConfigError::LogFile {
                path: config.log_file_path.clone(),
                source,
            })?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(writer);

    Ok(tracing_subscriber::registry()
        .with(config.level.filter())
        .with(stdout_layer)
        .with(file_layer))
}

/// Install the logger for this thread until the guard is dropped
pub fn install(config: &LoggingConfig) -> Result<DefaultGuard, ConfigError> {
    let subscriber = subscriber(config, std::io::stdout)?;
    Ok(tracing::subscriber::set_default(subscriber))
}
