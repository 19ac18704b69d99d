//! Configuration loading, validation, and management for SkillBus.
//!
//! Loads configuration from `~/.skillbus/config.toml` (or the file named by
//! `SKILLBUS_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use skillbus_core::BusOptions;

/// The root configuration structure.
///
/// Maps directly to `~/.skillbus/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Event bus sizing and timing
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Which skills to start, plus per-skill tables
    #[serde(default)]
    pub skills: SkillsConfig,

    /// Log level and output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// 0 waits forever for in-flight handlers on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// 0 means unbounded.
    #[serde(default)]
    pub max_concurrent_handlers: usize,
}

fn default_max_queue_size() -> usize {
    1000
}
fn default_history_size() -> usize {
    100
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            history_size: default_history_size(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_concurrent_handlers: 0,
        }
    }
}

impl EventBusConfig {
    pub fn to_bus_options(&self) -> BusOptions {
        BusOptions {
            max_queue_size: self.max_queue_size,
            history_size: self.history_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: (self.shutdown_timeout_secs > 0)
                .then(|| Duration::from_secs(self.shutdown_timeout_secs)),
            max_concurrent_handlers: (self.max_concurrent_handlers > 0)
                .then_some(self.max_concurrent_handlers),
        }
    }
}

/// The `[skills]` table.
///
/// Any sub-table other than `enabled`/`experimental` is a per-skill
/// configuration slice, passed verbatim to that skill's factory:
///
/// ```toml
/// [skills]
/// enabled = ["memory", "code"]
///
/// [skills.memory]
/// memory_file = "memory_store.json"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Skills to start. Absent means every catalog entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,

    /// Skills flagged as experimental (informational).
    #[serde(default)]
    pub experimental: Vec<String>,

    /// Per-skill tables keyed by skill name
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl SkillsConfig {
    /// The configured enabled list, or `catalog` when none is configured.
    pub fn enabled_or(&self, catalog: Vec<String>) -> Vec<String> {
        self.enabled.clone().unwrap_or(catalog)
    }

    /// Configuration slice for `name`; `Null` when none is configured.
    pub fn settings_for(&self, name: &str) -> serde_json::Value {
        self.settings
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn is_experimental(&self, name: &str) -> bool {
        self.experimental.iter().any(|s| s == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `skillbus_core=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    ///
    /// Resolution order:
    /// 1. `SKILLBUS_CONFIG` (path to a TOML file)
    /// 2. `~/.skillbus/config.toml`
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_path(None)
    }

    /// Like [`AppConfig::load`], but an explicit `path` takes the place of
    /// `SKILLBUS_CONFIG` and the default location. Env overrides apply
    /// either way.
    pub fn load_with_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => env("SKILLBUS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(Self::config_path),
        };
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// `SKILLBUS_LOG_LEVEL`, `SKILLBUS_LOG_FORMAT` and `SKILLBUS_QUEUE_SIZE`.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(level) = env("SKILLBUS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = env("SKILLBUS_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "SKILLBUS_LOG_FORMAT must be 'pretty' or 'json', got '{other}'"
                    )));
                }
            };
        }

        if let Some(size) = env("SKILLBUS_QUEUE_SIZE") {
            self.event_bus.max_queue_size = size.parse().map_err(|_| {
                ConfigError::ValidationError(format!("SKILLBUS_QUEUE_SIZE is not a number: '{size}'"))
            })?;
        }
        Ok(())
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".skillbus")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_bus.max_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "event_bus.max_queue_size must be > 0".into(),
            ));
        }

        if self.event_bus.history_size == 0 {
            return Err(ConfigError::ValidationError(
                "event_bus.history_size must be > 0".into(),
            ));
        }

        if self.event_bus.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "event_bus.poll_interval_ms must be > 0".into(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.level must not be empty".into(),
            ));
        }

        if let Some(enabled) = &self.skills.enabled {
            let mut seen = std::collections::BTreeSet::new();
            for name in enabled {
                if name.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "skills.enabled contains an empty name".into(),
                    ));
                }
                if !seen.insert(name) {
                    return Err(ConfigError::ValidationError(format!(
                        "skills.enabled lists '{name}' more than once"
                    )));
                }
            }
        }

        for (name, value) in &self.skills.settings {
            if !value.is_object() {
                return Err(ConfigError::ValidationError(format!(
                    "skills.{name} must be a table"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_bus.max_queue_size, 1000);
        assert_eq!(config.event_bus.history_size, 100);
        assert!(config.skills.enabled.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.event_bus.max_queue_size, config.event_bus.max_queue_size);
        assert_eq!(parsed.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn zero_queue_size_rejected() {
        let mut config = AppConfig::default();
        config.event_bus.max_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_enabled_skill_rejected() {
        let mut config = AppConfig::default();
        config.skills.enabled = Some(vec!["memory".into(), "memory".into()]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.event_bus.max_queue_size, 1000);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_queue_size = 1000"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn skill_tables_are_passed_through() {
        let toml_str = r#"
[event_bus]
max_queue_size = 50
max_concurrent_handlers = 4

[skills]
enabled = ["memory", "code"]
experimental = ["code"]

[skills.memory]
memory_file = "/tmp/mem.json"
max_short_term_memory = 10

[skills.code]
safe_mode = false
allowed_commands = ["ls"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.skills.enabled_or(vec!["x".into()]),
            vec!["memory".to_string(), "code".to_string()]
        );
        assert!(config.skills.is_experimental("code"));
        assert!(!config.skills.is_experimental("memory"));

        let memory = config.skills.settings_for("memory");
        assert_eq!(memory["memory_file"], "/tmp/mem.json");
        assert_eq!(memory["max_short_term_memory"], 10);
        assert_eq!(config.skills.settings_for("code")["allowed_commands"][0], "ls");
        assert!(config.skills.settings_for("research").is_null());

        let options = config.event_bus.to_bus_options();
        assert_eq!(options.max_queue_size, 50);
        assert_eq!(options.max_concurrent_handlers, Some(4));
    }

    #[test]
    fn enabled_defaults_to_catalog() {
        let config = AppConfig::default();
        let all = vec!["code".to_string(), "memory".to_string()];
        assert_eq!(config.skills.enabled_or(all.clone()), all);
    }

    #[test]
    fn bus_options_zero_means_unbounded() {
        let options = EventBusConfig {
            shutdown_timeout_secs: 0,
            ..EventBusConfig::default()
        }
        .to_bus_options();
        assert!(options.shutdown_timeout.is_none());
        assert!(options.max_concurrent_handlers.is_none());
        assert_eq!(options.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn load_from_file_and_reject_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);

        std::fs::write(&path, "[event_bus]\nhistory_size = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));

        std::fs::write(&path, "[event_bus\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));

        std::fs::write(&path, "[skills]\nmemory = 3\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_apply_to_an_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[event_bus]\nmax_queue_size = 10\n").unwrap();

        let untouched = AppConfig::load_with(Some(path.as_path()), env_of(&[])).unwrap();
        assert_eq!(untouched.event_bus.max_queue_size, 10);

        let env = env_of(&[
            ("SKILLBUS_QUEUE_SIZE", "77"),
            ("SKILLBUS_LOG_LEVEL", "trace"),
            ("SKILLBUS_LOG_FORMAT", "JSON"),
        ]);
        let config = AppConfig::load_with(Some(path.as_path()), env).unwrap();
        assert_eq!(config.event_bus.max_queue_size, 77);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn config_path_comes_from_env_when_not_given() {
        let dir = tempfile::tempdir().unwrap();
        let from_env = dir.path().join("env.toml");
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&from_env, "[event_bus]\nhistory_size = 7\n").unwrap();
        std::fs::write(&explicit, "[event_bus]\nhistory_size = 9\n").unwrap();
        let env_path = from_env.display().to_string();
        let vars = [("SKILLBUS_CONFIG", env_path.as_str())];

        let config = AppConfig::load_with(None, env_of(&vars)).unwrap();
        assert_eq!(config.event_bus.history_size, 7);

        let config = AppConfig::load_with(Some(explicit.as_path()), env_of(&vars)).unwrap();
        assert_eq!(config.event_bus.history_size, 9);
    }

    #[test]
    fn bad_env_overrides_are_rejected() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.apply_overrides(env_of(&[("SKILLBUS_LOG_FORMAT", "xml")])),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(config.apply_overrides(env_of(&[("SKILLBUS_QUEUE_SIZE", "lots")])).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let zero_queue = env_of(&[("SKILLBUS_QUEUE_SIZE", "0")]);
        let zero = AppConfig::load_with(Some(path.as_path()), zero_queue);
        assert!(matches!(zero, Err(ConfigError::ValidationError(_))));
    }
}
