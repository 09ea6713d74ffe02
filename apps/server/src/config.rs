//! Application configuration.

use serde::{Deserialize, Serialize};
use slotwatch_core::GlobalDefaults;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite URL for settings, tokens and the activity log.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seeded into the store as the global defaults document.
    #[serde(default)]
    pub defaults: GlobalDefaults,
    /// Activity log entries older than this are deleted.
    #[serde(default = "default_activity_retention_days")]
    pub activity_retention_days: i64,
}

fn default_database_url() -> String {
    "sqlite://slotwatch.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_activity_retention_days() -> i64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            log_level: default_log_level(),
            defaults: GlobalDefaults::default(),
            activity_retention_days: default_activity_retention_days(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: display,
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.defaults.intervals.check_coefficients, 5);
        assert_eq!(config.activity_retention_days, 30);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/slotwatch.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"log_level": "debug", "database_url": "sqlite::memory:"}"#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.defaults, GlobalDefaults::default());
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let path = std::env::temp_dir().join(format!("slotwatch-config-{}.json", std::process::id()));
        std::fs::write(&path, "{not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
