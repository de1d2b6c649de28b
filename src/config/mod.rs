//! Configuration module for the retention daemon.
//!
//! The daemon is configured via a TOML file (JSON is accepted for files
//! ending in `.json`), with support for environment variable interpolation
//! using `${VAR_NAME}` syntax.
//!
//! Loading is lenient: a missing file, an unparseable document, or a single
//! malformed field never stops the daemon. Each problem is recorded as a
//! [`ConfigError`] warning and the affected field falls back to its default
//! while the remaining fields keep their configured values.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! source_directory = "${APP_LOG_DIR}"
//! archive_after_days = 7
//! delete_after_days = 30
//!
//! [observability.logging]
//! level = "info"
//! format = "json"
//! ```

mod observability;
mod retention;

use std::path::{Path, PathBuf};

pub use observability::*;
pub use retention::*;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "logwarden.toml";

/// Root configuration for the retention daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Retention thresholds and the directory they apply to.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// A configuration resolved with per-field fallbacks, plus every fallback
/// that was taken along the way.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: DaemonConfig,
    pub warnings: Vec<ConfigError>,
}

/// Document syntax, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl DaemonConfig {
    /// Load configuration, never failing.
    ///
    /// Whatever cannot be read is replaced by defaults: the whole document
    /// when the file is missing or unparseable, a single field when only
    /// that field is malformed.
    pub fn load(path: impl AsRef<Path>) -> LoadedConfig {
        let path = path.as_ref();
        let mut warnings = Vec::new();

        let document = match read_document(path) {
            Ok(document) => document,
            Err(e) => {
                warnings.push(e);
                Value::Object(Map::new())
            }
        };

        let config = Self::resolve(&document, &mut warnings);
        LoadedConfig { config, warnings }
    }

    /// Load configuration from a file, rejecting anything malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e, path.to_path_buf()))?;

        Self::from_str_with_format(&contents, ConfigFormat::from_path(path))
    }

    /// Parse configuration from a TOML string, rejecting anything malformed.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_str_with_format(contents, ConfigFormat::Toml)
    }

    pub fn from_str_with_format(contents: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let mut config: DaemonConfig = match format {
            ConfigFormat::Toml => toml::from_str(&expanded).map_err(ConfigError::Parse)?,
            ConfigFormat::Json => {
                serde_json::from_str(&expanded).map_err(ConfigError::ParseJson)?
            }
        };

        let fixes = config.retention.sanitize();
        if !fixes.is_empty() {
            return Err(ConfigError::Validation(fixes.join("; ")));
        }

        Ok(config)
    }

    fn resolve(document: &Value, warnings: &mut Vec<ConfigError>) -> Self {
        let mut root = Section::new(String::new(), Some(document), warnings);
        let retention = RetentionConfig::resolve(root.child("retention"));
        let observability = ObservabilityConfig::resolve(root.child("observability"));
        root.reject_unknown(&["retention", "observability"]);
        Self {
            retention,
            observability,
        }
    }

    /// The document written by `logwarden init`.
    pub fn default_document() -> &'static str {
        r#"# logwarden configuration

[retention]
# Directory whose log files are archived and purged (not recursive).
source_directory = "/var/log/logwarden"
# Compress log files into Logs_YYYYMMDD.zip once they are this many days old.
archive_after_days = 7
# Delete archives older than this many days.
delete_after_days = 30
# Case-insensitive file name suffixes that identify log files.
valid_extensions = [".log", ".txt"]
# Hours between retention cycles. A cycle also runs at startup.
interval_hours = 24
# Timestamp that defines a file's age: "created" or "modified".
age_basis = "created"

[observability.logging]
level = "info"
format = "compact"

# Uncomment to also write a daily-rolling log file.
# [observability.logging.file]
# directory = "/var/log/logwarden"
# prefix = "logwarden"
"#
    }

    /// Generate the JSON schema for the daemon configuration.
    #[cfg(feature = "json-schema")]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DaemonConfig)
    }
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(ConfigError::Io(e, path.to_path_buf())),
    };
    let expanded = expand_env_vars(&contents)?;

    match ConfigFormat::from_path(path) {
        ConfigFormat::Toml => {
            let table: toml::Table = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
            serde_json::to_value(table).map_err(ConfigError::ParseJson)
        }
        ConfigFormat::Json => serde_json::from_str(&expanded).map_err(ConfigError::ParseJson),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Config file {0} not found, using defaults")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse config: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// A table of the settings document, read one field at a time.
///
/// Every failed read is pushed onto the shared warning list and answered
/// with the caller's default, so one bad value never discards its
/// neighbours.
pub(crate) struct Section<'a> {
    path: String,
    fields: Option<&'a Map<String, Value>>,
    warnings: &'a mut Vec<ConfigError>,
}

impl<'a> Section<'a> {
    fn new(path: String, value: Option<&'a Value>, warnings: &'a mut Vec<ConfigError>) -> Self {
        let fields = match value {
            None | Some(Value::Null) => None,
            Some(Value::Object(fields)) => Some(fields),
            Some(other) => {
                warnings.push(ConfigError::InvalidField {
                    field: path.clone(),
                    message: format!("expected a table, found {other}"),
                });
                None
            }
        };
        Self {
            path,
            fields,
            warnings,
        }
    }

    fn qualify(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    /// Nested table. Reports a warning if the key holds something else.
    pub(crate) fn child(&mut self, key: &str) -> Section<'_> {
        let path = self.qualify(key);
        let value = self.fields.and_then(|fields| fields.get(key));
        Section::new(path, value, &mut *self.warnings)
    }

    /// Read a field, falling back to `default` when absent or malformed.
    pub(crate) fn field<T: DeserializeOwned>(&mut self, key: &str, default: fn() -> T) -> T {
        self.optional_field(key).unwrap_or_else(default)
    }

    /// Read a field that has no default. Absent, null, and malformed all
    /// yield `None`; only the last is reported.
    pub(crate) fn optional_field<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.fields.and_then(|fields| fields.get(key))?;
        if value.is_null() {
            return None;
        }
        match T::deserialize(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.warnings.push(ConfigError::InvalidField {
                    field: self.qualify(key),
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Record a problem that concerns the section as a whole.
    pub(crate) fn report(&mut self, message: String) {
        let field = if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.clone()
        };
        self.warnings
            .push(ConfigError::InvalidField { field, message });
    }

    /// Warn about keys this section does not understand (usually typos).
    pub(crate) fn reject_unknown(&mut self, known: &[&str]) {
        let Some(fields) = self.fields else {
            return;
        };
        for key in fields.keys() {
            if !known.contains(&key.as_str()) {
                self.warnings.push(ConfigError::InvalidField {
                    field: self.qualify(key),
                    message: "unknown field, ignored".to_string(),
                });
            }
        }
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
