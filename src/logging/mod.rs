//! Logging system initialization and configuration
//!
//! Uses the tracing ecosystem for structured logging with support for:
//! - Environment variable override (ROUTERPKG_LOG)
//! - Console output on stderr (stdout carries command results)
//! - Optional file output with daily rotation

use crate::config::LoggingConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "ROUTERPKG_LOG";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Get the default log directory path
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("routerpkg")
        .join("logs")
}

/// Default filter when `ROUTERPKG_LOG` is unset
fn default_filter(level: Level) -> String {
    format!("routerpkg={},russh=warn", level.as_str().to_lowercase())
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_file(config.file_line)
        .with_line_number(config.file_line);

    match (LogFormat::parse(&config.format), config.timestamps) {
        (LogFormat::Json, _) => layer.json().with_ansi(false).boxed(),
        (LogFormat::Pretty, true) => layer.pretty().boxed(),
        (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => layer.compact().boxed(),
        (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
    }
}

fn file_layer(config: &LoggingConfig) -> Option<BoxedLayer> {
    if !config.file_output {
        return None;
    }
    let log_dir = config.file_path.clone().unwrap_or_else(default_log_dir);

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory {:?}: {}", log_dir, e);
        return None;
    }
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "routerpkg.log");

    Some(
        fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    )
}

/// Initialize the logging system
///
/// # Environment Variables
/// - `ROUTERPKG_LOG`: Override log filter (e.g., "routerpkg=debug,russh=trace")
///
/// Calling this twice leaves the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) {
    let level = parse_level(&config.level);
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let layers: Vec<BoxedLayer> = std::iter::once(console_layer(config))
        .chain(file_layer(config))
        .collect();

    if tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .is_err()
    {
        return;
    }

    tracing::debug!(
        level = %level,
        format = %config.format,
        file_output = config.file_output,
        "Logging initialized"
    );
}

/// Parse log level from string
pub fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
