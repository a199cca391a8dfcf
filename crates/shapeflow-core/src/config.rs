//! Configuration management for the shapeflow client
//!
//! Handles loading and validation of `shapeflow.toml` configuration files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SHAPEFLOW_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "shapeflow.toml";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log format {other:?} (expected pretty or json)"
            ))),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Synchronization loop settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the shapeflow backend
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-request timeout in milliseconds (not applied to the event stream)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_url() -> String {
    "http://127.0.0.1:7951".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

/// Synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_sync_interval")]
    pub interval_ms: u64,

    /// Grace window before a failed call flips the client to disconnected
    #[serde(default = "default_max_time_without_contact")]
    pub max_time_without_contact_ms: u64,

    /// Warm-up window during which queue membership is reported as unknown
    #[serde(default = "default_load_interval")]
    pub load_interval_ms: u64,

    /// Maximum number of notices retained
    #[serde(default = "default_notice_limit")]
    pub notice_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval(),
            max_time_without_contact_ms: default_max_time_without_contact(),
            load_interval_ms: default_load_interval(),
            notice_limit: default_notice_limit(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn max_time_without_contact(&self) -> Duration {
        Duration::from_millis(self.max_time_without_contact_ms)
    }

    #[must_use]
    pub fn load_interval(&self) -> Duration {
        Duration::from_millis(self.load_interval_ms)
    }
}

fn default_sync_interval() -> u64 {
    2_000
}

fn default_max_time_without_contact() -> u64 {
    5_000
}

fn default_load_interval() -> u64 {
    1_000
}

fn default_notice_limit() -> usize {
    25
}

impl ClientConfig {
    /// Load configuration from default locations
    ///
    /// Lookup order: `$SHAPEFLOW_CONFIG`, then `./shapeflow.toml`, then
    /// built-in defaults.
    pub fn load() -> crate::Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the synchronizer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.url must not be empty".to_string(),
            ));
        }
        if self.backend.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "backend.request_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.sync.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sync.interval_ms must be > 0".to_string(),
            ));
        }
        if self.sync.max_time_without_contact_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sync.max_time_without_contact_ms must be > 0".to_string(),
            ));
        }
        if self.sync.notice_limit == 0 {
            return Err(ConfigError::ValidationError(
                "sync.notice_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.interval_ms, 2_000);
        assert_eq!(config.sync.max_time_without_contact_ms, 5_000);
        assert_eq!(config.sync.load_interval_ms, 1_000);
        assert_eq!(config.sync.notice_limit, 25);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [backend]
            url = "http://10.0.0.2:7951"

            [sync]
            interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.url, "http://10.0.0.2:7951");
        assert_eq!(config.backend.request_timeout_ms, 10_000);
        assert_eq!(config.sync.interval(), Duration::from_millis(500));
        assert_eq!(config.sync.notice_limit, 25);
    }

    #[test]
    fn logging_section_parses_format() {
        let config = ClientConfig::from_toml(
            r#"
            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_interval_rejected() {
        let err = ClientConfig::from_toml("[sync]\ninterval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn zero_notice_limit_rejected() {
        let err = ClientConfig::from_toml("[sync]\nnotice_limit = 0\n").unwrap_err();
        assert!(err.to_string().contains("notice_limit"));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = ClientConfig::from_toml("[sync\ninterval_ms = ").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nmax_time_without_contact_ms = 9000").unwrap();
        let config = ClientConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.sync.max_time_without_contact(),
            Duration::from_secs(9)
        );
    }

    #[test]
    fn load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
