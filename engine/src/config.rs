use serde::Deserialize;
use std::time::Duration;
use std::{env, path::PathBuf};

use crate::cleanup::RetentionPolicy;

#[derive(Debug, Default, Deserialize)]
pub struct VigilConfig {
    pub app: Option<AppConfig>,
    pub storage: Option<StorageConfig>,
    pub retention: Option<RetentionConfig>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Emit verbose startup diagnostics.
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Database file location. Default: `~/.vigil/vigil.db`.
    pub path: Option<PathBuf>,
}

/// Retention settings for the cleanup sweeps.
///
/// ```toml
/// [retention]
/// max_event_age_days = 90
/// sweep_interval_secs = 21600
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct RetentionConfig {
    pub max_event_age_days: Option<u32>,
    pub sweep_interval_secs: Option<u64>,
}

impl VigilConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn dev_mode(&self) -> bool {
        self.app.as_ref().is_some_and(|app| app.dev_mode)
    }

    /// Database location: configured path, else `~/.vigil/vigil.db`, else a
    /// file in the working directory when no home is known.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        if let Some(path) = self.storage.as_ref().and_then(|s| s.path.clone()) {
            return path;
        }
        dirs::home_dir()
            .map(|home| home.join(".vigil").join("vigil.db"))
            .unwrap_or_else(|| PathBuf::from("vigil.db"))
    }

    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        let defaults = RetentionPolicy::default();
        let retention = self.retention.as_ref();
        RetentionPolicy {
            max_event_age_days: retention
                .and_then(|r| r.max_event_age_days)
                .unwrap_or(defaults.max_event_age_days),
            sweep_interval: retention
                .and_then(|r| r.sweep_interval_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }
}

/// `VIGIL_CONFIG` overrides the default `~/.vigil/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("VIGIL_CONFIG")
        && !custom.trim().is_empty()
    {
        return Some(PathBuf::from(custom));
    }
    dirs::home_dir().map(|home| home.join(".vigil").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: VigilConfig = toml::from_str(
            r#"
            [app]
            dev_mode = true

            [storage]
            path = "/tmp/vigil-test.db"

            [retention]
            max_event_age_days = 30
            sweep_interval_secs = 60
            "#,
        )
        .unwrap();

        assert!(config.dev_mode());
        assert_eq!(config.storage_path(), PathBuf::from("/tmp/vigil-test.db"));
        let policy = config.retention_policy();
        assert_eq!(policy.max_event_age_days, 30);
        assert_eq!(policy.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: VigilConfig = toml::from_str("").unwrap();
        assert!(!config.dev_mode());
        let policy = config.retention_policy();
        assert_eq!(policy.max_event_age_days, 90);
        assert_eq!(policy.sweep_interval, Duration::from_secs(6 * 60 * 60));
        assert!(config.storage_path().ends_with("vigil.db"));
    }

    #[test]
    fn partial_sections_fall_back_per_field() {
        let config: VigilConfig = toml::from_str(
            r"
            [retention]
            max_event_age_days = 7
            ",
        )
        .unwrap();
        let policy = config.retention_policy();
        assert_eq!(policy.max_event_age_days, 7);
        assert_eq!(policy.sweep_interval, Duration::from_secs(6 * 60 * 60));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(toml::from_str::<VigilConfig>("app = 3").is_err());
    }
}
