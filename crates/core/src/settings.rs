use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SETTINGS_FILE_NAME: &str = "settings.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Row limit for table loads.
    pub page_size: usize,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub tick_rate_ms: u64,
    /// Seconds between session pings; 0 turns them off.
    pub health_check_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: 100,
            log_filter: "info".to_string(),
            tick_rate_ms: 120,
            health_check_secs: 30,
        }
    }
}

impl Settings {
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Self = toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.page_size = settings.page_size.max(1);
        Ok(settings)
    }

    #[must_use]
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms.max(10))
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_secs > 0).then(|| Duration::from_secs(self.health_check_secs))
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{Settings, SettingsError};

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let settings = Settings::load_from_path(&temp_dir.path().join("settings.toml"))
            .expect("failed to load settings");

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.tick_rate(), Duration::from_millis(120));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("settings.toml");
        fs::write(&path, "page_size = 250\nlog_filter = \"tetra=debug\"\n")
            .expect("failed to write settings");

        let settings = Settings::load_from_path(&path).expect("failed to load settings");
        assert_eq!(settings.page_size, 250);
        assert_eq!(settings.log_filter, "tetra=debug");
        assert_eq!(settings.tick_rate_ms, 120);
        assert_eq!(settings.health_check_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_health_check_interval_disables_pings() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("settings.toml");
        fs::write(&path, "health_check_secs = 0\n").expect("failed to write settings");

        let settings = Settings::load_from_path(&path).expect("failed to load settings");
        assert_eq!(settings.health_check_interval(), None);
    }

    #[test]
    fn invalid_values_are_reported() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("settings.toml");
        fs::write(&path, "page_size = \"many\"").expect("failed to write settings");

        let err = Settings::load_from_path(&path).expect_err("parse should fail");
        assert!(matches!(err, SettingsError::Parse { .. }));
    }
}
