//! Biometric capability reporting
//!
//! The platform sensor itself lives outside this crate. Hosts implement
//! [`BiometricProbe`] over whatever their OS offers (Android BiometricPrompt,
//! Touch ID, Windows Hello) and hand it to the service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Kind of biometric sensor reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiometryKind {
    Face,
    Fingerprint,
    #[default]
    None,
}

/// Whether, and what kind of, biometric sensor is usable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricCapability {
    pub is_available: bool,
    pub kind: BiometryKind,
    /// Platform explanation when the sensor is not usable
    pub error: Option<String>,
}

impl BiometricCapability {
    /// A usable sensor of the given kind
    pub fn available(kind: BiometryKind) -> Self {
        Self {
            is_available: true,
            kind,
            error: None,
        }
    }

    /// No usable sensor, with an optional reason
    pub fn unavailable(error: Option<String>) -> Self {
        Self {
            is_available: false,
            kind: BiometryKind::None,
            error,
        }
    }
}

/// Platform biometric sensor
#[async_trait]
pub trait BiometricProbe: Send + Sync {
    /// Report sensor availability without prompting the user
    async fn capability(&self) -> Result<BiometricCapability, ProbeError>;

    /// Show the platform prompt and report whether the user was recognised
    async fn prompt_and_verify(&self) -> Result<bool, ProbeError>;
}

/// Probe for hosts without any biometric hardware
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiometrics;

#[async_trait]
impl BiometricProbe for NoBiometrics {
    async fn capability(&self) -> Result<BiometricCapability, ProbeError> {
        Ok(BiometricCapability::unavailable(Some(
            "no biometric hardware on this device".to_string(),
        )))
    }

    async fn prompt_and_verify(&self) -> Result<bool, ProbeError> {
        Err(ProbeError::Unavailable(
            "no biometric hardware on this device".to_string(),
        ))
    }
}
