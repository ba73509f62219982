//! PIN hashing and credential verification
//!
//! PINs are hashed with Argon2id into PHC strings; the salt travels inside the
//! string. Verification parses the stored hash and compares outputs in
//! constant time. Malformed input never errors, it simply fails to verify.

use std::fmt;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::SetupError;
use crate::settings::{PinHash, SecuritySettings};

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;
/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 12;

/// Ways the vault can be unlocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlockMethodKind {
    Biometric,
    Pin,
}

/// Unlock method as presented to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockMethod {
    pub kind: UnlockMethodKind,
    /// The device can offer this method
    pub available: bool,
    /// The user turned this method on
    pub enabled: bool,
}

impl UnlockMethod {
    /// Offered on the unlock screen
    pub fn is_usable(&self) -> bool {
        self.available && self.enabled
    }
}

/// Credential presented on an unlock attempt
pub enum Credential {
    /// PIN typed by the user
    Pin(Zeroizing<String>),
    /// Result already produced by the platform biometric prompt
    BiometricAssertion(bool),
}

impl Credential {
    pub fn pin(pin: &str) -> Self {
        Credential::Pin(Zeroizing::new(pin.to_string()))
    }

    pub fn method(&self) -> UnlockMethodKind {
        match self {
            Credential::Pin(_) => UnlockMethodKind::Pin,
            Credential::BiometricAssertion(_) => UnlockMethodKind::Biometric,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Pin(_) => f.write_str("Pin(<redacted>)"),
            Credential::BiometricAssertion(ok) => write!(f, "BiometricAssertion({})", ok),
        }
    }
}

/// Argon2id cost parameters for new PIN hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHashParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for PinHashParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl PinHashParams {
    /// Minimal cost, for tests and constrained demos only
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Params, SetupError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| SetupError::Hashing(format!("invalid Argon2 parameters: {}", e)))
    }
}

/// Validate PIN format
pub fn validate_pin(pin: &str) -> Result<(), SetupError> {
    if pin.len() < MIN_PIN_LENGTH {
        return Err(SetupError::PinTooShort(MIN_PIN_LENGTH));
    }

    if pin.len() > MAX_PIN_LENGTH {
        return Err(SetupError::PinTooLong(MAX_PIN_LENGTH));
    }

    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(SetupError::InvalidPinFormat);
    }

    Ok(())
}

/// Checks presented credentials against the stored settings
pub trait CredentialVerifier: Send + Sync {
    /// Produce a salted one-way hash of a validated PIN
    fn hash_pin(&self, pin: &str) -> Result<PinHash, SetupError>;

    /// Compare a PIN against a stored hash
    fn verify_pin(&self, pin: &str, hash: &PinHash) -> bool;

    /// Accept a platform biometric assertion
    ///
    /// The prompt already happened; only the enablement is checked here.
    fn verify_biometric(&self, settings: &SecuritySettings, asserted: bool) -> bool {
        settings.biometric_enabled && asserted
    }

    /// Dispatch on the credential kind
    fn verify(&self, settings: &SecuritySettings, credential: &Credential) -> bool {
        match credential {
            Credential::Pin(pin) => match (&settings.pin_hash, settings.pin_enabled) {
                (Some(hash), true) => self.verify_pin(pin, hash),
                _ => false,
            },
            Credential::BiometricAssertion(asserted) => self.verify_biometric(settings, *asserted),
        }
    }
}

/// Argon2id-backed verifier
#[derive(Clone)]
pub struct Argon2Verifier {
    argon2: Argon2<'static>,
}

impl Argon2Verifier {
    pub fn new(params: PinHashParams) -> Result<Self, SetupError> {
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?),
        })
    }
}

impl Default for Argon2Verifier {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl CredentialVerifier for Argon2Verifier {
    fn hash_pin(&self, pin: &str) -> Result<PinHash, SetupError> {
        validate_pin(pin)?;

        let salt = SaltString::generate(&mut OsRng);
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());

        let hash = self
            .argon2
            .hash_password(&pin_bytes, &salt)
            .map_err(|e| SetupError::Hashing(e.to_string()))?
            .to_string();

        Ok(PinHash::from_phc(hash))
    }

    fn verify_pin(&self, pin: &str, hash: &PinHash) -> bool {
        let parsed_hash = match PasswordHash::new(hash.as_phc()) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        self.argon2.verify_password(&pin_bytes, &parsed_hash).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_verifier() -> Argon2Verifier {
        Argon2Verifier::new(PinHashParams::insecure_fast()).unwrap()
    }

    #[test]
    fn test_pin_hash_and_verify() {
        let verifier = fast_verifier();
        let hash = verifier.hash_pin("1234").unwrap();

        assert!(hash.as_phc().starts_with("$argon2id$"));
        assert!(!hash.as_phc().contains("1234"));
        assert!(verifier.verify_pin("1234", &hash));
        assert!(!verifier.verify_pin("0000", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let verifier = fast_verifier();
        let first = verifier.hash_pin("1234").unwrap();
        let second = verifier.hash_pin("1234").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_pin_validation() {
        // Too short
        assert!(matches!(validate_pin("12"), Err(SetupError::PinTooShort(4))));

        // Too long
        assert!(matches!(validate_pin("1234567890123"), Err(SetupError::PinTooLong(12))));

        // Non-digits
        assert!(matches!(validate_pin("12a4"), Err(SetupError::InvalidPinFormat)));

        // Valid
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("123456789012").is_ok());
    }

    #[test]
    fn test_malformed_input_is_false() {
        let verifier = fast_verifier();
        let hash = verifier.hash_pin("1234").unwrap();

        assert!(!verifier.verify_pin("", &hash));
        assert!(!verifier.verify_pin("not a pin at all \u{0}", &hash));
        assert!(!verifier.verify_pin("1234", &PinHash::from_phc("garbage")));
    }

    #[test]
    fn test_verify_dispatch() {
        let verifier = fast_verifier();
        let mut settings = SecuritySettings {
            pin_enabled: true,
            pin_hash: Some(verifier.hash_pin("1234").unwrap()),
            ..Default::default()
        };

        assert!(verifier.verify(&settings, &Credential::pin("1234")));
        assert!(!verifier.verify(&settings, &Credential::BiometricAssertion(true)));

        settings.biometric_enabled = true;
        assert!(verifier.verify(&settings, &Credential::BiometricAssertion(true)));
        assert!(!verifier.verify(&settings, &Credential::BiometricAssertion(false)));

        settings.pin_enabled = false;
        assert!(!verifier.verify(&settings, &Credential::pin("1234")));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::pin("9876");
        assert!(!format!("{:?}", credential).contains("9876"));
        assert_eq!(credential.method(), UnlockMethodKind::Pin);
    }
}
