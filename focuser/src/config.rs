//! Focuser configuration.
//!
//! Stored as JSON, by default at `~/.cf_config/focuser.json`. Missing fields
//! fall back to the defaults for the configured model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FocuserError, FocuserResult};
use crate::protocol::DeviceModel;
use crate::session::{SessionOptions, DEFAULT_NOTIFY_THRESHOLD};
use crate::transport::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT, MAX_RESPONSE_LEN};

/// Default poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// File name under the config root.
pub const CONFIG_FILE_NAME: &str = "focuser.json";

/// Connection and timing settings for one focuser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocuserConfig {
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Controller family
    pub model: DeviceModel,
    /// Poll period in milliseconds
    pub poll_interval_ms: u64,
    /// Per-response read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Wait before the handshake in milliseconds
    pub handshake_delay_ms: u64,
    /// Position changes at or below this many ticks are not reported
    pub notify_threshold: i64,
    /// Read budget per response in bytes
    pub max_response_len: usize,
}

impl Default for FocuserConfig {
    fn default() -> Self {
        Self::default_for(DeviceModel::default())
    }
}

impl FocuserConfig {
    /// Defaults for `model`.
    pub fn default_for(model: DeviceModel) -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            model,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            handshake_delay_ms: model.handshake_delay().as_millis() as u64,
            notify_threshold: DEFAULT_NOTIFY_THRESHOLD,
            max_response_len: MAX_RESPONSE_LEN,
        }
    }

    /// `~/.cf_config/focuser.json`, or `.cf_config/focuser.json` if HOME is unset.
    pub fn default_path() -> PathBuf {
        let root = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".cf_config"))
            .unwrap_or_else(|_| PathBuf::from(".cf_config"));
        root.join(CONFIG_FILE_NAME)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> FocuserResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> FocuserResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> FocuserResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> FocuserResult<()> {
        if self.port.is_empty() {
            return Err(FocuserError::Config("port must not be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(FocuserError::Config("baud_rate must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(FocuserError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_response_len < 3 {
            return Err(FocuserError::Config(format!(
                "max_response_len {} cannot hold a framed value",
                self.max_response_len
            )));
        }
        if self.notify_threshold < 0 {
            return Err(FocuserError::Config(
                "notify_threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Session tunables derived from this config.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            handshake_delay: Duration::from_millis(self.handshake_delay_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_response_len: self.max_response_len,
            notify_threshold: self.notify_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_follow_model() {
        let bracket = FocuserConfig::default_for(DeviceModel::OwltoFocus);
        assert_eq!(bracket.handshake_delay_ms, 2000);
        assert_eq!(bracket.notify_threshold, 5);
        assert_eq!(bracket.max_response_len, 32);
        assert_eq!(bracket.poll_interval(), Duration::from_millis(500));

        let paren = FocuserConfig::default_for(DeviceModel::WilliamOpticsOwlto);
        assert_eq!(paren.handshake_delay_ms, 0);
        assert_eq!(paren.session_options().read_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = FocuserConfig::default_for(DeviceModel::OwltoFocusClassic);
        config.port = "/dev/ttyACM3".to_string();
        config.poll_interval_ms = 250;
        config.save(&path).unwrap();

        let loaded = FocuserConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"port": "/dev/ttyS1", "model": "william-optics-owlto"}"#).unwrap();

        let loaded = FocuserConfig::load(&path).unwrap();
        assert_eq!(loaded.port, "/dev/ttyS1");
        assert_eq!(loaded.model, DeviceModel::WilliamOpticsOwlto);
        assert_eq!(loaded.baud_rate, 9600);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = FocuserConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, FocuserConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"poll_interval_ms": 0}"#).unwrap();
        assert!(matches!(
            FocuserConfig::load(&path),
            Err(FocuserError::Config(_))
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FocuserConfig::load(&path), Err(FocuserError::Json(_))));
    }

    #[test]
    fn test_default_path_under_config_root() {
        let path = FocuserConfig::default_path();
        assert!(path.ends_with(".cf_config/focuser.json"));
    }
}
