//! Tracing initialization with configurable console format and an optional
//! daily-rolling log file.

use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{FileLogConfig, LogFormat, LoggingConfig, ObservabilityConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the global tracing subscriber.
///
/// Console output goes to stderr in the configured format. When a log file
/// is configured, the same events are also written, without ANSI colours,
/// to a file that rolls over daily.
///
/// The file sink is opened before anything is installed, so on
/// [`TracingError::FileSink`] the caller can retry without it.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<TracingGuard, TracingError> {
    let logging = &config.logging;

    let mut layers: Vec<BoxedLayer> = vec![format_layer(logging, std::io::stderr, true)];
    let mut file_guard = None;

    if let Some(file) = &logging.file {
        let appender = build_file_appender(file)?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(format_layer(logging, writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_env_filter(logging))
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))?;

    if let Some(file) = &logging.file {
        tracing::debug!(
            directory = %file.directory.display(),
            prefix = %file.prefix,
            "Writing logs to daily rolling file"
        );
    }

    Ok(TracingGuard { file_guard })
}

fn build_file_appender(config: &FileLogConfig) -> Result<RollingFileAppender, TracingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.prefix.clone())
        .build(&config.directory)
        .map_err(|source| TracingError::FileSink {
            directory: config.directory.clone(),
            source,
        })
}

fn format_layer<W>(logging: &LoggingConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);

    match (logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
    }
}

/// Build the event filter. `RUST_LOG` wins over the configured level and
/// filter directives; directives that fail to parse fall back to the level.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_directive();

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        let combined = format!("{},{}", base_level, filter);
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        EnvFilter::new(base_level)
    }
}

/// Keeps the background log-file writer alive. Dropping it flushes any
/// buffered lines.
pub struct TracingGuard {
    #[allow(dead_code)] // held for its Drop
    file_guard: Option<WorkerGuard>,
}

impl TracingGuard {
    /// A guard for a process that runs without a file sink.
    pub fn disabled() -> Self {
        Self { file_guard: None }
    }
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),

    #[error("Failed to open log directory {directory}: {source}")]
    FileSink {
        directory: std::path::PathBuf,
        #[source]
        source: InitError,
    },
}
