use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Initializes the global tracing subscriber from the logging section of
/// the loaded configuration. Holds the file-appender worker guard, if
/// any, alive for the process lifetime.
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

        let guard = if let Some(log_dir) = &config.log_dir {
            let file_appender = rolling::daily(log_dir, "swarmkeeper.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter.clone());

            let stdout_layer = build_stdout_layer(&config.format, env_filter);
            tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();
            Some(guard)
        } else {
            let stdout_layer = build_stdout_layer(&config.format, env_filter);
            tracing_subscriber::registry().with(stdout_layer).init();
            None
        };

        tracing::info!(level = %config.level, format = %config.format, file_output = config.log_dir.is_some(), "logger initialized");
        Ok(Self { _guard: guard })
    }
}

fn build_stdout_layer<S>(format: &str, filter: EnvFilter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(io::stdout)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter)
            .boxed()
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("invalid log level: {level}"),
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_is_case_insensitive() {
        assert!(matches!(parse_log_level("TRACE"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(parse_log_level("invalid").is_err());
    }
}
