//! Logging configuration module
//! Console output plus an optional rotated JSON log file

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "cloudfleet.log";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    pub level: String,
    /// Directory for the JSON log file; console only when unset
    pub log_dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: Some(PathBuf::from("/var/log/cloudfleet")),
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber
    ///
    /// The returned guard flushes the file writer and must be held for the
    /// life of the process.
    pub fn init(&self) -> cloudfleet_common::Result<Option<WorkerGuard>> {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_writer(io::stdout);

        let guard = if let Some(ref dir) = self.log_dir {
            let file_appender = match self.rotation {
                LogRotation::Hourly => rolling::hourly(dir, LOG_FILE_NAME),
                LogRotation::Daily => rolling::daily(dir, LOG_FILE_NAME),
                LogRotation::Never => rolling::never(dir, LOG_FILE_NAME),
            };
            let (writer, guard) = non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(self.env_filter())
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| cloudfleet_common::Error::System(format!("Logging init failed: {}", e)))?;

            Some(guard)
        } else {
            tracing_subscriber::registry()
                .with(self.env_filter())
                .with(console_layer)
                .try_init()
                .map_err(|e| cloudfleet_common::Error::System(format!("Logging init failed: {}", e)))?;

            None
        };

        tracing::info!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Log a cloud lifecycle operation with its cloud name
#[macro_export]
macro_rules! log_cloud_operation {
    ($op:expr, $cloud:expr) => {
        tracing::info!(
            operation = $op,
            cloud = %$cloud,
            "Cloud operation"
        )
    };
    ($op:expr, $cloud:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            operation = $op,
            cloud = %$cloud,
            $($key = $value),+,
            "Cloud operation"
        )
    };
}
