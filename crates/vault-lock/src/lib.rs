//! Vault lock
//!
//! Guards an open personal knowledge store with a second, local authentication
//! layer. Once enabled, the vault starts locked, re-locks after a period of
//! inactivity, when the application is backgrounded or on demand, and unlocks
//! with a PIN or a biometric assertion. Failed attempts are counted and the
//! vault refuses further attempts once the budget is spent.
//!
//! [`SecurityService`] is the entry point; everything else is the model it
//! is built from.
//!
//! ```ignore
//! let repository = Arc::new(JsonFileSettingsRepository::new(dir));
//! let service = SecurityService::builder(AccountId::new("alice"), repository).build();
//! service.initialize().await?;
//! service.setup_pin("4821").await?;
//! service.update_security_settings(SettingsUpdate::vault_lock(true)).await?;
//! ```

pub mod activity;
pub mod biometric;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod lockout;
pub mod monitor;
pub mod observer;
pub mod repository;
pub mod service;
pub mod settings;
pub mod state;

pub use biometric::{BiometricCapability, BiometricProbe, BiometryKind, NoBiometrics};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, VaultLockConfig};
pub use credential::{
    validate_pin, Argon2Verifier, Credential, CredentialVerifier, PinHashParams, UnlockMethod,
    UnlockMethodKind, MAX_PIN_LENGTH, MIN_PIN_LENGTH,
};
pub use error::{InitError, PersistenceError, ProbeError, Result, SecurityError, SetupError};
pub use lockout::{LockoutPolicy, DEFAULT_MAX_ATTEMPTS};
pub use observer::{StateSubscriber, Subscription, SubscriptionId};
pub use repository::{InMemorySettingsRepository, JsonFileSettingsRepository, SettingsRepository};
pub use service::{InitReport, SecurityService, SecurityServiceBuilder};
pub use settings::{AccountId, PinHash, SecuritySettings, SettingsUpdate, DEFAULT_LOCK_TIMEOUT_MINUTES};
pub use state::{LockEvent, LockReason, LockState, StateChange, UnlockOutcome};
