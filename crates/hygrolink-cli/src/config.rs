//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use hygrolink_core::uuids::{TELEMETRY_CHARACTERISTIC_SHORT, VENDOR_SERVICE_SHORT};
use serde::{Deserialize, Serialize};

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Use Fahrenheit as the primary temperature unit
    pub fahrenheit: bool,

    /// Vendor service short UUID
    pub service_uuid: u16,

    /// Telemetry characteristic short UUID
    pub characteristic_uuid: u16,

    /// Scan timeout in seconds; unset means scan until Enter
    pub scan_timeout: Option<u64>,

    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// Connect retries after the first attempt
    pub connect_retries: u32,

    /// Default log filter (e.g. "info", "hygrolink_core=debug")
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fahrenheit: false,
            service_uuid: VENDOR_SERVICE_SHORT,
            characteristic_uuid: TELEMETRY_CHARACTERISTIC_SHORT,
            scan_timeout: None,
            connect_timeout: 15,
            connect_retries: 0,
            log_level: None,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hygrolink")
            .join("config.toml")
    }

    /// Load config from `path`, or return defaults if the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Reject values the connection layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == 0 {
            bail!("connect_timeout must be at least 1 second");
        }
        if self.scan_timeout == Some(0) {
            bail!("scan_timeout must be at least 1 second when set");
        }
        Ok(())
    }
}

/// Explicit value wins, then the config value.
pub fn resolve_timeout(cmd_timeout: Option<u64>, config: &Config) -> Option<u64> {
    cmd_timeout.or(config.scan_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.service_uuid, 0xFFE5);
        assert_eq!(config.characteristic_uuid, 0xFFE8);
        assert_eq!(config.connect_timeout, 15);
        assert_eq!(config.connect_retries, 0);
        assert!(!config.fahrenheit);
        assert!(config.scan_timeout.is_none());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            fahrenheit: true,
            scan_timeout: Some(20),
            connect_retries: 3,
            log_level: Some("debug".to_string()),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "fahrenheit = true\nservice_uuid = 0xFFF0\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.fahrenheit);
        assert_eq!(config.service_uuid, 0xFFF0);
        assert_eq!(config.characteristic_uuid, 0xFFE8);
        assert_eq!(config.connect_timeout, 15);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "fahrenheit = \"maybe\"").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = Config {
            connect_timeout: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            scan_timeout: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_timeout() {
        let config = Config {
            scan_timeout: Some(30),
            ..Config::default()
        };
        assert_eq!(resolve_timeout(Some(5), &config), Some(5));
        assert_eq!(resolve_timeout(None, &config), Some(30));
        assert_eq!(resolve_timeout(None, &Config::default()), None);
    }
}
