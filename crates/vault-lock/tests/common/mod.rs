//! Shared fixtures for the vault lock integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use vault_lock::{
    AccountId, Argon2Verifier, BiometricCapability, BiometricProbe, BiometryKind, Credential,
    CredentialVerifier, InMemorySettingsRepository, LockoutPolicy, ManualClock, PersistenceError,
    PinHash, PinHashParams, ProbeError, SecurityService, SecuritySettings, SettingsRepository,
    SetupError, StateChange, StateSubscriber,
};

pub const PIN: &str = "1234";
pub const WRONG_PIN: &str = "0000";

pub fn account() -> AccountId {
    AccountId::new("alice")
}

pub fn fast_verifier() -> Argon2Verifier {
    Argon2Verifier::new(PinHashParams::insecure_fast()).unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()))
}

/// Enabled settings with a PIN hash for [`PIN`]
pub fn pin_settings(timeout_minutes: u32) -> SecuritySettings {
    SecuritySettings {
        vault_lock_enabled: true,
        pin_enabled: true,
        pin_hash: Some(fast_verifier().hash_pin(PIN).unwrap()),
        lock_timeout_minutes: timeout_minutes,
        ..Default::default()
    }
}

/// Verifier that counts how often it is consulted
pub struct CountingVerifier {
    inner: Argon2Verifier,
    pub verifications: AtomicUsize,
}

impl CountingVerifier {
    pub fn new() -> Self {
        Self {
            inner: fast_verifier(),
            verifications: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    fn argon2(&self) -> &Argon2Verifier {
        &self.inner
    }
}

impl CredentialVerifier for CountingVerifier {
    fn hash_pin(&self, pin: &str) -> Result<PinHash, SetupError> {
        self.argon2().hash_pin(pin)
    }

    fn verify_pin(&self, pin: &str, hash: &PinHash) -> bool {
        self.argon2().verify_pin(pin, hash)
    }

    fn verify(&self, settings: &SecuritySettings, credential: &Credential) -> bool {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        match credential {
            Credential::Pin(pin) => match (&settings.pin_hash, settings.pin_enabled) {
                (Some(hash), true) => self.verify_pin(pin, hash),
                _ => false,
            },
            Credential::BiometricAssertion(asserted) => settings.biometric_enabled && *asserted,
        }
    }
}

/// Scripted biometric sensor
pub struct MockProbe {
    capability: Mutex<Result<BiometricCapability, ProbeError>>,
    prompts: Mutex<VecDeque<Result<bool, ProbeError>>>,
    pub capability_calls: AtomicUsize,
    pub prompt_calls: AtomicUsize,
    delay: Duration,
}

impl MockProbe {
    pub fn face() -> Self {
        Self::with_capability(Ok(BiometricCapability::available(BiometryKind::Face)))
    }

    pub fn failing(error: ProbeError) -> Self {
        Self::with_capability(Err(error))
    }

    pub fn with_capability(capability: Result<BiometricCapability, ProbeError>) -> Self {
        Self {
            capability: Mutex::new(capability),
            prompts: Mutex::new(VecDeque::new()),
            capability_calls: AtomicUsize::new(0),
            prompt_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Slow capability queries, to widen the window for concurrent callers
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the result of the next prompt; an empty queue answers `true`
    pub fn push_prompt(&self, result: Result<bool, ProbeError>) {
        self.prompts.lock().unwrap().push_back(result);
    }

    pub fn capability_calls(&self) -> usize {
        self.capability_calls.load(Ordering::SeqCst)
    }

    pub fn prompt_calls(&self) -> usize {
        self.prompt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BiometricProbe for MockProbe {
    async fn capability(&self) -> Result<BiometricCapability, ProbeError> {
        self.capability_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.capability.lock().unwrap().clone()
    }

    async fn prompt_and_verify(&self) -> Result<bool, ProbeError> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
}

/// In-memory store whose loads and saves can be made to fail
#[derive(Default)]
pub struct FlakyRepository {
    inner: InMemorySettingsRepository,
    pub fail_load: AtomicBool,
    pub fail_save: AtomicBool,
    pub saves: AtomicUsize,
}

impl FlakyRepository {
    pub fn with_settings(settings: SecuritySettings) -> Self {
        Self {
            inner: InMemorySettingsRepository::with_settings(account(), settings),
            ..Default::default()
        }
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsRepository for FlakyRepository {
    async fn load(&self, account: &AccountId) -> Result<Option<SecuritySettings>, PersistenceError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("store offline".to_string()));
        }
        self.inner.load(account).await
    }

    async fn save(&self, account: &AccountId, settings: &SecuritySettings) -> Result<(), PersistenceError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("store offline".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(account, settings).await
    }
}

/// Everything a test needs to drive and observe one service
pub struct Harness {
    pub service: SecurityService,
    pub repository: Arc<FlakyRepository>,
    pub probe: Arc<MockProbe>,
    pub verifier: Arc<CountingVerifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(settings: Option<SecuritySettings>) -> Self {
        Self::with_probe(settings, MockProbe::face())
    }

    pub fn with_probe(settings: Option<SecuritySettings>, probe: MockProbe) -> Self {
        // Ticks are driven by hand through `check_inactivity`
        Self::build(settings, probe, Duration::from_secs(3600))
    }

    /// A harness whose monitor polls every `interval`
    pub fn build(settings: Option<SecuritySettings>, probe: MockProbe, interval: Duration) -> Self {
        let repository = Arc::new(match settings {
            Some(settings) => FlakyRepository::with_settings(settings),
            None => FlakyRepository::default(),
        });
        let probe = Arc::new(probe);
        let verifier = Arc::new(CountingVerifier::new());
        let clock = clock();

        let service = SecurityService::builder(account(), repository.clone())
            .probe(probe.clone())
            .verifier(verifier.clone())
            .clock(clock.clone())
            .lockout_policy(LockoutPolicy::new(5))
            .poll_interval(interval)
            .build();

        Self {
            service,
            repository,
            probe,
            verifier,
            clock,
        }
    }

    /// Record every delivered change
    pub fn record(&self) -> (Arc<Mutex<Vec<StateChange>>>, StateSubscriber) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber = StateSubscriber::new(move |change| {
            sink.lock().unwrap().push(change.clone());
        });
        (seen, subscriber)
    }
}
