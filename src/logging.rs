//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over [`LoggingConfig::filter`]. When a log
//! directory is configured, output is duplicated to a daily rolling file; the
//! returned guard must be kept alive for the file writer to flush.

use crate::config::LoggingConfig;
use crate::error::{FlowError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| FlowError::Config(format!("Invalid log filter {:?}: {}", config.filter, e)))?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .try_init()
                .map_err(|e| FlowError::Config(format!("Failed to install subscriber: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .map_err(|e| FlowError::Config(format!("Failed to install subscriber: {}", e)))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        // Only exercised when RUST_LOG is unset, otherwise the env filter wins.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            filter: "frameflow=notalevel[".to_string(),
            ..Default::default()
        };
        assert!(matches!(init(&config), Err(FlowError::Config(_))));
    }
}
