//! Log output for the daemon.
//!
//! Events go to a rolling log file and, unless disabled, to stderr. The filter
//! comes from `MOUNTLINK_LOG` when set, otherwise from the configured level.

use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogConfig, LogRotation};
use crate::error::{Error, Result};

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "MOUNTLINK_LOG";

const LOG_FILE_PREFIX: &str = "mountlink";

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped and must be held
/// for as long as the process logs.
pub fn init(config: &LogConfig, console: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(&config.directory).map_err(|e| Error::LoggingInit {
        message: format!("cannot create {}: {e}", config.directory.display()),
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(&config.directory)
        .map_err(|e| Error::LoggingInit {
            message: e.to_string(),
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter(&config.level)?);

    let console_layer = console.then(|| {
        filter(&config.level).map(|f| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(f)
        })
    });
    let console_layer = console_layer.transpose()?;

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| Error::LoggingInit {
            message: e.to_string(),
        })?;

    Ok(guard)
}

fn filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| Error::LoggingInit {
        message: format!("invalid log level '{level}': {e}"),
    })
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}
