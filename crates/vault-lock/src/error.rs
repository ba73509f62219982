//! Error types for the vault lock

use thiserror::Error;

/// Result type alias for settings and lifecycle operations
pub type Result<T> = std::result::Result<T, SecurityError>;

/// Failures of the durable settings store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// IO error while reading or writing settings
    #[error("IO error: {0}")]
    Io(String),

    /// Stored settings could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure reported by the repository
    #[error("Settings backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// Failures reported by the platform biometric probe
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("Biometric sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Biometric prompt cancelled")]
    Cancelled,

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Errors surfaced by `SecurityService::initialize`
///
/// The service keeps running in a degraded, unlocked mode when one of these
/// occurs; the error is only returned for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("Failed to load security settings: {0}")]
    SettingsLoad(#[source] PersistenceError),

    #[error("Biometric probe failed: {0}")]
    BiometricProbe(#[source] ProbeError),
}

/// Errors from PIN and biometric setup
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("PIN must be at least {0} digits")]
    PinTooShort(usize),

    #[error("PIN must be at most {0} digits")]
    PinTooLong(usize),

    #[error("PIN must contain only digits")]
    InvalidPinFormat,

    #[error("PINs do not match")]
    PinMismatch,

    #[error("Biometric authentication unavailable: {0}")]
    BiometricUnavailable(String),

    #[error("Failed to hash PIN: {0}")]
    Hashing(String),

    #[error("Biometric probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors from settings updates and vault lock lifecycle calls
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Invalid security settings: {0}")]
    InvalidSettings(String),
}
