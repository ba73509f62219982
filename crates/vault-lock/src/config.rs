//! Vault lock configuration
//!
//! Host-level knobs that are not user preferences: which account to guard,
//! where the JSON settings documents live, the attempt budget, the monitor
//! poll interval and the PIN hashing cost.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::PinHashParams;
use crate::lockout::DEFAULT_MAX_ATTEMPTS;

/// Configuration directory name
const CONFIG_DIR_NAME: &str = "vault-lock";

/// Configuration file name
const CONFIG_FILE_NAME: &str = "config.json";

/// Vault lock host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultLockConfig {
    /// Account whose settings are guarded
    #[serde(default = "default_account")]
    pub account: String,

    /// Directory holding per-account settings documents
    #[serde(default = "default_settings_dir")]
    pub settings_dir: PathBuf,

    /// Failed unlocks allowed before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Inactivity monitor poll interval (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Argon2id cost for new PIN hashes
    #[serde(default)]
    pub pin_hash: PinHashParams,
}

fn default_account() -> String {
    "default".to_string()
}

fn default_settings_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join("settings")
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for VaultLockConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            settings_dir: default_settings_dir(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            pin_hash: PinHashParams::default(),
        }
    }
}

impl VaultLockConfig {
    /// Default config file location (`VAULT_LOCK_CONFIG` overrides)
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("VAULT_LOCK_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}
