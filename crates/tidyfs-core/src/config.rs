//! Configuration loading and validation
//!
//! The configuration file is YAML. Daemon and logging sections are small
//! typed structs; the `rules` section goes through the shorthand decoder
//! in [`crate::decode`]. Loading produces a [`ConfigError`] on the first
//! malformed construct; [`Config::validate`] then reports every remaining
//! problem so the user can fix them all at once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::Value;
use tracing::info;

use crate::decode;
use crate::errors::ConfigError;
use crate::rule::Rule;
use crate::template::expand_tilde;

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

const TOP_LEVEL_KEYS: &[&str] = &["rules", "daemon", "logging"];

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub rules: Vec<Rule>,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
}

/// Daemon behavior settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// How long a rule's locations must be quiet before the rule runs.
    pub debounce: Duration,
    /// Override for the IPC socket path.
    pub socket: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(500), socket: None }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string() }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tidyfs/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidyfs")
            .join("config.yaml")
    }

    /// Load and decode the configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&content, path)
    }

    /// Decode configuration from a YAML string. `path` is only used in
    /// error messages.
    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        if root.is_null() {
            return Ok(Self::default());
        }
        let mapping = root
            .as_mapping()
            .ok_or_else(|| ConfigError::decode("config", "top level must be a mapping"))?;

        for key in mapping.keys() {
            let key = key
                .as_str()
                .ok_or_else(|| ConfigError::decode("config", "top-level keys must be strings"))?;
            if !TOP_LEVEL_KEYS.contains(&key) {
                return Err(ConfigError::decode(
                    "config",
                    format!("unknown key `{key}`; recognized keys: {}", TOP_LEVEL_KEYS.join(", ")),
                ));
            }
        }

        let rules = match root.get("rules") {
            None => Vec::new(),
            Some(v) => {
                let seq = v
                    .as_sequence()
                    .ok_or_else(|| ConfigError::decode("rules", "must be a list"))?;
                decode::decode_rules(seq)?
            }
        };

        let daemon = match root.get("daemon") {
            None => DaemonConfig::default(),
            Some(v) => decode_daemon(v)?,
        };

        let logging = match root.get("logging") {
            None => LoggingConfig::default(),
            Some(v) => decode_logging(v)?,
        };

        Ok(Config { rules, daemon, logging })
    }

    /// Materialize a commented starter configuration at `path` if no file
    /// exists there yet. Returns true when a file was written.
    pub fn write_default(path: &Path) -> anyhow::Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, DEFAULT_CONFIG)?;
        info!(path = %path.display(), "Wrote starter configuration");
        Ok(true)
    }
}

fn decode_daemon(value: &Value) -> Result<DaemonConfig, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode("daemon", "must be a mapping"))?;

    let mut config = DaemonConfig::default();
    for (key, val) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode("daemon", "keys must be strings"))?;
        match key {
            "debounce" => config.debounce = decode::parse_duration(val, "daemon.debounce")?,
            "socket" => {
                let s = val
                    .as_str()
                    .ok_or_else(|| ConfigError::decode("daemon.socket", "must be a path string"))?;
                config.socket = Some(expand_tilde(s));
            }
            other => {
                return Err(ConfigError::decode("daemon", format!("unknown key `{other}`")))
            }
        }
    }
    Ok(config)
}

fn decode_logging(value: &Value) -> Result<LoggingConfig, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode("logging", "must be a mapping"))?;

    let mut config = LoggingConfig::default();
    for (key, val) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode("logging", "keys must be strings"))?;
        match key {
            "level" => {
                config.level = val
                    .as_str()
                    .ok_or_else(|| ConfigError::decode("logging.level", "must be a string"))?
                    .to_string();
            }
            other => {
                return Err(ConfigError::decode("logging", format!("unknown key `{other}`")))
            }
        }
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"logging.level"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if self.daemon.debounce.is_zero() {
            errors.push(ValidationError {
                field: "daemon.debounce".into(),
                message: "must be greater than 0".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if !seen.insert(rule.name.as_str()) {
                errors.push(ValidationError {
                    field: format!("rules[{i}].name"),
                    message: format!("duplicate rule name '{}'", rule.name),
                });
            }
        }

        errors
    }
}

const DEFAULT_CONFIG: &str = r#"# tidyfs configuration
#
# Each rule watches one or more directories and runs its action chain on
# files matching the filters. Example:
#
# rules:
#   - name: tidy-downloads
#     locations: ~/Downloads
#     filters:
#       - extension: [tmp, part]
#         date_modified: {before: {days_ago: 7}}
#     actions:
#       - trash

rules: []

daemon:
  debounce: 500ms

logging:
  level: warn
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Config {
        Config::from_yaml_str(content, Path::new("test.yaml")).unwrap()
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = parse("");
        assert!(config.rules.is_empty());
        assert_eq!(config.daemon.debounce, Duration::from_millis(500));
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
rules:
  - name: downloads
    locations: /tmp/downloads
    recursive: true
    traversal: breadth-first
    filters:
      - extension: [txt, md]
    actions:
      - move: /tmp/sorted
daemon:
  debounce: 250ms
  socket: /tmp/tidyfs.sock
logging:
  level: debug
"#,
        );
        assert_eq!(config.rules.len(), 1);
        assert!(config.rules[0].recursive);
        assert_eq!(config.daemon.debounce, Duration::from_millis(250));
        assert_eq!(config.daemon.socket.as_deref(), Some(Path::new("/tmp/tidyfs.sock")));
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_unknown_top_level_key() {
        let err = Config::from_yaml_str("watchers: []\n", Path::new("t.yaml")).unwrap_err();
        assert!(err.to_string().contains("unknown key `watchers`"));
    }

    #[test]
    fn test_validate_log_level() {
        let config = parse("logging:\n  level: info\n");
        assert!(config.validate().is_empty());

        let config = parse("logging:\n  level: loud\n");
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "logging.level");
    }

    #[test]
    fn test_validate_duplicate_rule_names() {
        let config = parse(
            "rules:\n  - {name: r, locations: /tmp}\n  - {name: r, locations: /var}\n",
        );
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate"));
    }

    #[test]
    fn test_validate_zero_debounce() {
        let config = parse("daemon:\n  debounce: 0\n");
        let errors = config.validate();
        assert_eq!(errors[0].field, "daemon.debounce");
    }

    #[test]
    fn test_write_default_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("conf/config.yaml");

        assert!(Config::write_default(&path).unwrap());
        assert!(!Config::write_default(&path).unwrap());

        let config = Config::load(&path).unwrap();
        assert!(config.rules.is_empty());
        assert!(config.validate().is_empty());
    }
}
