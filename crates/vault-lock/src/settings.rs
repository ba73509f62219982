//! Persisted security settings

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SecurityError;

/// Default inactivity timeout in minutes
pub const DEFAULT_LOCK_TIMEOUT_MINUTES: u32 = 5;

/// Identity of the account whose settings are stored
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Salted one-way PIN hash in PHC string format
///
/// The contents are opaque to everything except the credential verifier and
/// are never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinHash(String);

impl PinHash {
    pub fn from_phc(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    pub fn as_phc(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinHash(<redacted>)")
    }
}

/// Vault lock preferences for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Whether the vault lock is active at all
    #[serde(default)]
    pub vault_lock_enabled: bool,

    /// Whether biometric unlock is accepted
    #[serde(default)]
    pub biometric_enabled: bool,

    /// Whether PIN unlock is accepted
    #[serde(default)]
    pub pin_enabled: bool,

    /// Hash of the configured PIN
    #[serde(default)]
    pub pin_hash: Option<PinHash>,

    /// Inactivity period before the vault locks itself
    #[serde(default = "default_lock_timeout_minutes")]
    pub lock_timeout_minutes: u32,

    /// Lock when the application goes to the background
    #[serde(default = "default_auto_lock_on_minimize")]
    pub auto_lock_on_minimize: bool,
}

fn default_lock_timeout_minutes() -> u32 {
    DEFAULT_LOCK_TIMEOUT_MINUTES
}

fn default_auto_lock_on_minimize() -> bool {
    true
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            vault_lock_enabled: false,
            biometric_enabled: false,
            pin_enabled: false,
            pin_hash: None,
            lock_timeout_minutes: DEFAULT_LOCK_TIMEOUT_MINUTES,
            auto_lock_on_minimize: true,
        }
    }
}

impl SecuritySettings {
    /// Inactivity timeout as a chrono duration
    pub fn lock_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lock_timeout_minutes))
    }

    /// Whether a PIN can currently be used to unlock
    pub fn pin_usable(&self) -> bool {
        self.pin_enabled && self.pin_hash.is_some()
    }

    /// Settings after "disable vault lock": credentials cleared, methods off
    ///
    /// Timeout and minimize preferences survive so re-enabling keeps them.
    pub fn disabled(&self) -> Self {
        Self {
            vault_lock_enabled: false,
            biometric_enabled: false,
            pin_enabled: false,
            pin_hash: None,
            lock_timeout_minutes: self.lock_timeout_minutes,
            auto_lock_on_minimize: self.auto_lock_on_minimize,
        }
    }

    /// Apply a partial update, validating the result
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Self, SecurityError> {
        let mut next = self.clone();

        if let Some(enabled) = update.vault_lock_enabled {
            next.vault_lock_enabled = enabled;
        }
        if let Some(enabled) = update.biometric_enabled {
            next.biometric_enabled = enabled;
        }
        if let Some(enabled) = update.pin_enabled {
            next.pin_enabled = enabled;
        }
        if let Some(minutes) = update.lock_timeout_minutes {
            next.lock_timeout_minutes = minutes;
        }
        if let Some(auto_lock) = update.auto_lock_on_minimize {
            next.auto_lock_on_minimize = auto_lock;
        }

        next.validate()?;
        Ok(next)
    }

    fn validate(&self) -> Result<(), SecurityError> {
        if self.lock_timeout_minutes == 0 {
            return Err(SecurityError::InvalidSettings(
                "lock timeout must be at least one minute".to_string(),
            ));
        }
        if self.pin_enabled && self.pin_hash.is_none() {
            return Err(SecurityError::InvalidSettings(
                "PIN unlock requires a PIN to be set up first".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial settings change requested by the UI
///
/// The PIN hash is deliberately absent: it is only written by PIN setup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub vault_lock_enabled: Option<bool>,
    #[serde(default)]
    pub biometric_enabled: Option<bool>,
    #[serde(default)]
    pub pin_enabled: Option<bool>,
    #[serde(default)]
    pub lock_timeout_minutes: Option<u32>,
    #[serde(default)]
    pub auto_lock_on_minimize: Option<bool>,
}

impl SettingsUpdate {
    pub fn vault_lock(enabled: bool) -> Self {
        Self {
            vault_lock_enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn lock_timeout(minutes: u32) -> Self {
        Self {
            lock_timeout_minutes: Some(minutes),
            ..Default::default()
        }
    }
}
