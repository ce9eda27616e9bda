//! Tracing initialization: a console layer in the configured format plus the
//! persistent rolling log file.

use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::filter_fn,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    config::{LogFileConfig, LogFormat, LogRotation, LoggingConfig, ObservabilityConfig},
    retention::PROGRESS_TARGET,
};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Initialize the tracing subscriber with the given configuration.
///
/// This sets up:
/// - Environment-based log filtering
/// - Console logging on stderr with configurable format (pretty, compact, JSON)
/// - The rolling application log file, if enabled
///
/// Progress events are already rendered on stdout by the CLI, so the console
/// layer leaves them out. The file layer keeps them.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<TracingGuard, TracingError> {
    let logging = &config.logging;
    let filter = build_env_filter(logging);

    let mut layers: Vec<BoxedLayer> = vec![console_layer(logging)];

    let file_guard = if logging.file.enabled {
        let (writer, guard) = file_writer(&logging.file)?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(logging.file_line)
                .with_line_number(logging.file_line)
                .boxed(),
        );
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))?;

    if logging.file.enabled {
        tracing::debug!(
            directory = %logging.file.directory.display(),
            prefix = %logging.file.prefix,
            rotation = ?logging.file.rotation,
            "Application log file enabled"
        );
    }

    Ok(TracingGuard { file: file_guard })
}

fn console_layer(logging: &LoggingConfig) -> BoxedLayer {
    let skip_progress = filter_fn(|meta| meta.target() != PROGRESS_TARGET);

    match (&logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_filter(skip_progress)
            .boxed(),
        (LogFormat::Pretty, false) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .without_time()
            .with_filter(skip_progress)
            .boxed(),
        (LogFormat::Compact, true) => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_filter(skip_progress)
            .boxed(),
        (LogFormat::Compact, false) => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .without_time()
            .with_filter(skip_progress)
            .boxed(),
        (LogFormat::Json, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_filter(skip_progress)
            .boxed(),
        (LogFormat::Json, false) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .without_time()
            .with_filter(skip_progress)
            .boxed(),
    }
}

/// Open the rolling log file behind a non-blocking writer.
fn file_writer(config: &LogFileConfig) -> Result<(NonBlocking, WorkerGuard), TracingError> {
    std::fs::create_dir_all(&config.directory).map_err(|e| {
        TracingError::Init(format!(
            "Failed to create log directory {}: {e}",
            config.directory.display()
        ))
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .filename_prefix(&config.prefix)
        .build(&config.directory)
        .map_err(|e| TracingError::Init(format!("Failed to open log file: {e}")))?;

    Ok(tracing_appender::non_blocking(appender))
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

/// Build the environment filter from logging config.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_directive();

    // RUST_LOG wins over the config file
    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        let combined = format!("{},{}", base_level, filter);
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        EnvFilter::new(base_level)
    }
}

/// Keeps the log file writer alive. Buffered lines are flushed when dropped.
pub struct TracingGuard {
    #[allow(dead_code)]
    file: Option<WorkerGuard>,
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}
