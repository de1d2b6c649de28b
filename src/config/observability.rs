use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Section;

/// Observability configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ObservabilityConfig {
    pub(crate) fn resolve(mut section: Section<'_>) -> Self {
        let logging = LoggingConfig::resolve(section.child("logging"));
        section.reject_unknown(&["logging"]);
        Self { logging }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include file/line information.
    #[serde(default)]
    pub file_line: bool,

    /// Filter directives (e.g., "logwarden::retention=debug").
    #[serde(default)]
    pub filter: Option<String>,

    /// Optional daily-rolling log file, written in addition to stderr.
    #[serde(default)]
    pub file: Option<FileLogConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            filter: None,
            file: None,
        }
    }
}

impl LoggingConfig {
    fn resolve(mut section: Section<'_>) -> Self {
        let config = Self {
            level: section.field("level", default_log_level),
            format: section.field("format", LogFormat::default),
            timestamps: section.field("timestamps", default_true),
            file_line: section.field("file_line", bool::default),
            filter: section.optional_field("filter"),
            file: section.optional_field("file"),
        };
        section.reject_unknown(&[
            "level",
            "format",
            "timestamps",
            "file_line",
            "filter",
            "file",
        ]);
        config
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
    /// JSON format (for log aggregation).
    Json,
}

/// Daily-rolling log file sink.
///
/// Rolled files are named `<prefix>.YYYY-MM-DD`, which keeps them clear of
/// the default `.log`/`.txt` extensions when the sink points at the swept
/// directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct FileLogConfig {
    /// Directory the log files are written to.
    pub directory: PathBuf,

    /// File name prefix.
    #[serde(default = "default_file_prefix")]
    pub prefix: String,
}

fn default_file_prefix() -> String {
    "logwarden".to_string()
}
