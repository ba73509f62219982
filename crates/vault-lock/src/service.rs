//! Security service
//!
//! The one object the UI talks to. It owns the lock state machine, the
//! settings cache, the activity tracker and the inactivity monitor, and it is
//! the only code path that mutates any of them.
//!
//! # Concurrency
//!
//! - Transitions run under a `tokio::sync::Mutex` around the state machine,
//!   including the credential check, so attempts cannot race past lockout.
//!   The check itself runs on the blocking pool while the guard is held.
//! - Snapshots are published through a `watch` channel, so reading the lock
//!   state never waits for a transition.
//! - Settings writes hold the settings write guard across the save.
//! - Lock order is always settings first, then the state machine.
//! - `initialize` runs through a `OnceCell`: concurrent callers await the
//!   same in-flight run, later callers get its cached result.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, OnceCell, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::activity::ActivityTracker;
use crate::biometric::{BiometricCapability, BiometricProbe, NoBiometrics};
use crate::clock::{Clock, SystemClock};
use crate::config::VaultLockConfig;
use crate::credential::{
    validate_pin, Argon2Verifier, Credential, CredentialVerifier, UnlockMethod, UnlockMethodKind,
};
use crate::error::{InitError, PersistenceError, ProbeError, SecurityError, SetupError};
use crate::lockout::LockoutPolicy;
use crate::monitor::{ActivityMonitor, TimeoutEpisode, DEFAULT_POLL_INTERVAL};
use crate::observer::{StateSubscriber, SubscriberRegistry, Subscription};
use crate::repository::{JsonFileSettingsRepository, SettingsRepository};
use crate::settings::{AccountId, SecuritySettings, SettingsUpdate};
use crate::state::{
    LockEvent, LockReason, LockState, LockStateMachine, StateChange, UnlockGate, UnlockOutcome,
};

/// What the first `initialize` call established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    pub vault_lock_enabled: bool,
    /// The vault was locked with `Startup` by this initialization
    pub locked_at_startup: bool,
    pub biometric: BiometricCapability,
}

/// Builder for [`SecurityService`]
pub struct SecurityServiceBuilder {
    account: AccountId,
    repository: Arc<dyn SettingsRepository>,
    probe: Arc<dyn BiometricProbe>,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    poll_interval: Duration,
}

impl SecurityServiceBuilder {
    pub fn probe(mut self, probe: Arc<dyn BiometricProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn build(self) -> SecurityService {
        let now = self.clock.now();
        let machine = LockStateMachine::new(self.policy);
        let (snapshot, _) = watch::channel(machine.snapshot(now));

        SecurityService {
            inner: Arc::new(Inner {
                account: self.account,
                repository: self.repository,
                probe: self.probe,
                verifier: self.verifier,
                clock: self.clock,
                machine: Mutex::new(machine),
                snapshot,
                activity: ActivityTracker::new(now),
                episode: TimeoutEpisode::new(),
                settings: RwLock::new(None),
                capability: RwLock::new(BiometricCapability::default()),
                degraded: AtomicBool::new(false),
                initialized: OnceCell::new(),
                monitor: ActivityMonitor::new(self.poll_interval),
                subscribers: SubscriberRegistry::new(),
            }),
        }
    }
}

/// Handle to the vault lock
///
/// Construct one per application and pass clones to whoever needs it; clones
/// share the same state.
#[derive(Clone)]
pub struct SecurityService {
    inner: Arc<Inner>,
}

struct Inner {
    account: AccountId,
    repository: Arc<dyn SettingsRepository>,
    probe: Arc<dyn BiometricProbe>,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
    machine: Mutex<LockStateMachine>,
    snapshot: watch::Sender<LockState>,
    activity: ActivityTracker,
    episode: TimeoutEpisode,
    settings: RwLock<Option<SecuritySettings>>,
    capability: RwLock<BiometricCapability>,
    /// Initialization failed; behave as if the vault lock were off
    degraded: AtomicBool,
    initialized: OnceCell<Result<InitReport, InitError>>,
    monitor: ActivityMonitor,
    subscribers: Arc<SubscriberRegistry>,
}

impl SecurityService {
    /// Start building a service over a settings store
    ///
    /// Defaults: no biometric hardware, Argon2id with default cost, system
    /// clock, five attempts, one second poll interval.
    pub fn builder(account: AccountId, repository: Arc<dyn SettingsRepository>) -> SecurityServiceBuilder {
        SecurityServiceBuilder {
            account,
            repository,
            probe: Arc::new(NoBiometrics),
            verifier: Arc::new(Argon2Verifier::default()),
            clock: Arc::new(SystemClock),
            policy: LockoutPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build a service backed by the JSON settings store named in `config`
    pub fn from_config(
        config: &VaultLockConfig,
        probe: Arc<dyn BiometricProbe>,
    ) -> Result<Self, SetupError> {
        let repository = Arc::new(JsonFileSettingsRepository::new(config.settings_dir.clone()));
        let verifier = Arc::new(Argon2Verifier::new(config.pin_hash)?);

        Ok(Self::builder(AccountId::new(config.account.clone()), repository)
            .probe(probe)
            .verifier(verifier)
            .lockout_policy(LockoutPolicy::new(config.max_attempts))
            .poll_interval(config.poll_interval())
            .build())
    }

    pub fn account(&self) -> &AccountId {
        &self.inner.account
    }

    /// Load settings, probe biometrics, apply the startup lock, start the monitor
    ///
    /// Runs once per service. Concurrent callers share the in-flight run and
    /// every later call returns the same result without side effects. On
    /// error the service stays usable, unlocked, with no unlock methods.
    pub async fn initialize(&self) -> Result<InitReport, InitError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .initialized
            .get_or_init(|| async move { inner.run_initialize().await })
            .await
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.initialized()
    }

    /// Query the biometric sensor; never touches lock state
    pub async fn check_biometric_capability(&self) -> BiometricCapability {
        let capability = match self.inner.probe.capability().await {
            Ok(capability) => capability,
            Err(e) => {
                debug!("Biometric probe failed: {}", e);
                BiometricCapability::unavailable(Some(e.to_string()))
            }
        };

        *self.inner.capability.write().await = capability.clone();
        capability
    }

    /// Enable biometric unlock
    ///
    /// Prompts once so the user proves the sensor recognises them. Returns
    /// `Ok(false)`, changing nothing, when that prompt fails.
    pub async fn setup_biometric(&self) -> Result<bool, SetupError> {
        let capability = self.check_biometric_capability().await;
        if !capability.is_available {
            return Err(SetupError::BiometricUnavailable(
                capability
                    .error
                    .unwrap_or_else(|| "no biometric sensor available".to_string()),
            ));
        }

        if !self.inner.probe.prompt_and_verify().await? {
            info!("Biometric setup not confirmed by the user");
            return Ok(false);
        }

        let mut settings = self.inner.settings.write().await;
        let mut next = settings.clone().unwrap_or_default();
        next.biometric_enabled = true;
        self.inner.commit_settings(&mut settings, next).await?;

        info!("Biometric unlock enabled for account {}", self.inner.account);
        Ok(true)
    }

    /// Set or replace the PIN and enable PIN unlock
    pub async fn setup_pin(&self, pin: &str) -> Result<bool, SetupError> {
        validate_pin(pin)?;
        let hash = self.inner.verifier.hash_pin(pin)?;

        let mut settings = self.inner.settings.write().await;
        let mut next = settings.clone().unwrap_or_default();
        next.pin_hash = Some(hash);
        next.pin_enabled = true;
        self.inner.commit_settings(&mut settings, next).await?;

        info!("PIN set up for account {}", self.inner.account);
        Ok(true)
    }

    /// `setup_pin` with a confirmation entry
    pub async fn setup_pin_confirmed(&self, pin: &str, confirmation: &str) -> Result<bool, SetupError> {
        if pin != confirmation {
            return Err(SetupError::PinMismatch);
        }
        self.setup_pin(pin).await
    }

    /// Try to unlock; true only if this call unlocked the vault
    pub async fn unlock_vault(&self, credential: Credential) -> bool {
        self.attempt_unlock(credential).await.is_unlocked()
    }

    /// Try to unlock and report the detailed outcome
    ///
    /// A spent attempt budget short-circuits before the credential is looked
    /// at.
    pub async fn attempt_unlock(&self, credential: Credential) -> UnlockOutcome {
        let settings = self.inner.settings.read().await.clone();
        let mut machine = self.inner.machine.lock().await;

        match machine.unlock_gate() {
            UnlockGate::NotLocked => return UnlockOutcome::NotLocked,
            UnlockGate::LockedOut => {
                warn!("Unlock refused: attempt budget exhausted");
                return UnlockOutcome::LockedOut;
            }
            UnlockGate::Open => {}
        }

        let method = credential.method();
        let verifier = Arc::clone(&self.inner.verifier);
        let verification = tokio::task::spawn_blocking(move || {
            settings
                .as_ref()
                .is_some_and(|settings| verifier.verify(settings, &credential))
        });
        let verified = match verification.await {
            Ok(verified) => verified,
            Err(e) => {
                warn!("Credential verification task failed: {}", e);
                false
            }
        };

        if verified {
            // Unlocking is an interaction; start a fresh inactivity episode
            self.inner.activity.touch(self.inner.clock.now());
        }

        let (outcome, event) = machine.unlock(verified);
        let change = self.inner.publish(&machine, event);
        drop(machine);

        match outcome {
            UnlockOutcome::Unlocked => info!("Vault unlocked with {:?}", method),
            UnlockOutcome::Rejected { remaining_attempts } => {
                warn!(
                    "Unlock with {:?} rejected ({} attempts remaining)",
                    method, remaining_attempts
                )
            }
            _ => {}
        }

        self.inner.deliver(change);
        outcome
    }

    /// Prompt for biometrics and unlock with the result
    ///
    /// The prompt is skipped when the vault is unlocked or locked out. A
    /// cancelled or failed prompt does not count as an attempt.
    pub async fn authenticate_biometric(&self) -> Result<UnlockOutcome, ProbeError> {
        match self.inner.machine.lock().await.unlock_gate() {
            UnlockGate::NotLocked => return Ok(UnlockOutcome::NotLocked),
            UnlockGate::LockedOut => return Ok(UnlockOutcome::LockedOut),
            UnlockGate::Open => {}
        }

        let enabled = self
            .inner
            .settings
            .read()
            .await
            .as_ref()
            .is_some_and(|settings| settings.biometric_enabled);
        if !enabled {
            return Err(ProbeError::Unavailable(
                "biometric unlock is not enabled".to_string(),
            ));
        }

        let asserted = self.inner.probe.prompt_and_verify().await?;
        Ok(self
            .attempt_unlock(Credential::BiometricAssertion(asserted))
            .await)
    }

    /// Lock the vault; returns whether it is locked afterwards
    ///
    /// `Startup` and `Timeout` are reserved for the service itself and are
    /// refused here.
    pub async fn lock_vault(&self, reason: LockReason) -> bool {
        match reason {
            LockReason::Startup | LockReason::Timeout => {
                warn!("Refusing external lock request with reason {}", reason);
                self.get_lock_state().is_locked
            }
            LockReason::Manual | LockReason::Minimize => self.inner.lock_with(reason).await,
        }
    }

    /// The application moved to the background
    ///
    /// Locks with `Minimize` when the user asked for that.
    pub async fn app_backgrounded(&self) -> bool {
        let auto_lock = self
            .inner
            .settings
            .read()
            .await
            .as_ref()
            .is_some_and(|settings| settings.auto_lock_on_minimize);

        if auto_lock {
            self.inner.lock_with(LockReason::Minimize).await
        } else {
            self.get_lock_state().is_locked
        }
    }

    /// Record a user interaction
    pub fn update_activity(&self) {
        self.inner.activity.touch(self.inner.clock.now());
    }

    /// Snapshot of the current lock state
    pub fn get_lock_state(&self) -> LockState {
        let mut state = self.inner.snapshot.borrow().clone();
        state.last_activity = self.inner.activity.last_activity();
        state
    }

    /// Time left before the inactivity lock, as `MM:SS`
    ///
    /// `None` while the vault is locked or the vault lock is off.
    pub async fn lock_countdown(&self) -> Option<String> {
        let settings = self.inner.settings.read().await;
        if !self.inner.vault_lock_active(&settings) || self.get_lock_state().is_locked {
            return None;
        }

        let timeout = (*settings).as_ref()?.lock_timeout();
        Some(
            self.inner
                .activity
                .remaining_formatted(self.inner.clock.now(), timeout),
        )
    }

    /// Cached settings; `None` if the vault lock was never configured
    pub async fn get_security_settings(&self) -> Option<SecuritySettings> {
        self.inner.settings.read().await.clone()
    }

    /// Unlock methods for the unlock and settings screens
    pub async fn get_unlock_methods(&self) -> Vec<UnlockMethod> {
        let degraded = self.inner.degraded.load(Ordering::SeqCst);
        let settings = self.inner.settings.read().await.clone().unwrap_or_default();
        let capability = self.inner.capability.read().await.clone();

        vec![
            UnlockMethod {
                kind: UnlockMethodKind::Biometric,
                available: capability.is_available && !degraded,
                enabled: settings.biometric_enabled && !degraded,
            },
            UnlockMethod {
                kind: UnlockMethodKind::Pin,
                available: !degraded,
                enabled: settings.pin_usable() && !degraded,
            },
        ]
    }

    /// Register a callback for every transition
    ///
    /// Registering a handle that is already registered returns a disposer for
    /// the existing registration instead of adding a second one.
    pub fn on_state_change(&self, subscriber: &StateSubscriber) -> Subscription {
        self.inner.subscribers.register(subscriber)
    }

    /// Receiver for every future transition
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.subscribers.subscribe()
    }

    /// Apply a partial settings change
    ///
    /// Turning the vault lock off unlocks and stops the monitor; turning it
    /// on starts the monitor.
    pub async fn update_security_settings(&self, update: SettingsUpdate) -> Result<(), SecurityError> {
        let mut settings = self.inner.settings.write().await;
        let current = settings.clone().unwrap_or_default();
        let next = current.apply(&update)?;

        if next.biometric_enabled
            && !current.biometric_enabled
            && !self.inner.capability.read().await.is_available
        {
            return Err(SecurityError::InvalidSettings(
                "biometric unlock is not available on this device".to_string(),
            ));
        }

        self.inner.commit_settings(&mut settings, next).await?;
        let enabled = settings
            .as_ref()
            .is_some_and(|settings| settings.vault_lock_enabled);
        let change = self.inner.apply_enablement(enabled).await;
        drop(settings);

        debug!("Security settings updated for account {}", self.inner.account);
        self.inner.deliver(change);
        Ok(())
    }

    /// Turn the vault lock off and forget all credentials
    pub async fn disable_vault_lock(&self) -> Result<(), SecurityError> {
        let mut settings = self.inner.settings.write().await;
        let next = settings.clone().unwrap_or_default().disabled();
        self.inner.commit_settings(&mut settings, next).await?;

        let change = self.inner.apply_enablement(false).await;
        drop(settings);

        info!("Vault lock disabled for account {}", self.inner.account);
        self.inner.deliver(change);
        Ok(())
    }

    /// Run one inactivity check now; true if it locked the vault
    pub async fn check_inactivity(&self) -> bool {
        self.inner.check_inactivity().await
    }

    pub fn is_monitor_running(&self) -> bool {
        self.inner.monitor.is_running()
    }

    /// Stop the inactivity monitor; returns whether it was running
    pub fn shutdown(&self) -> bool {
        let stopped = self.inner.monitor.stop();
        if stopped {
            info!("Vault lock monitor shut down");
        }
        stopped
    }
}

impl Inner {
    async fn run_initialize(self: &Arc<Self>) -> Result<InitReport, InitError> {
        info!("Initializing vault lock for account {}", self.account);

        let settings = match self.repository.load(&self.account).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load security settings, vault lock unavailable: {}", e);
                self.degraded.store(true, Ordering::SeqCst);
                return Err(InitError::SettingsLoad(e));
            }
        };

        let capability = self.probe.capability().await;
        *self.settings.write().await = settings.clone();

        let capability = match capability {
            Ok(capability) => capability,
            Err(e) => {
                warn!("Biometric probe failed, vault lock unavailable: {}", e);
                *self.capability.write().await = BiometricCapability::unavailable(Some(e.to_string()));
                self.degraded.store(true, Ordering::SeqCst);
                return Err(InitError::BiometricProbe(e));
            }
        };
        *self.capability.write().await = capability.clone();

        let vault_lock_enabled = settings
            .as_ref()
            .is_some_and(|settings| settings.vault_lock_enabled);
        self.activity.touch(self.clock.now());

        let mut locked_at_startup = false;
        if vault_lock_enabled {
            let mut machine = self.machine.lock().await;
            let event = machine.lock(LockReason::Startup, true);
            locked_at_startup = event.is_some();
            let change = self.publish(&machine, event);
            drop(machine);

            info!("Vault locked at startup");
            self.deliver(change);
            self.start_monitor();
        } else {
            debug!("Vault lock disabled, starting unlocked");
        }

        Ok(InitReport {
            vault_lock_enabled,
            locked_at_startup,
            biometric: capability,
        })
    }

    /// Whether lock requests are honoured right now
    fn vault_lock_active(&self, settings: &Option<SecuritySettings>) -> bool {
        !self.degraded.load(Ordering::SeqCst)
            && settings
                .as_ref()
                .is_some_and(|settings| settings.vault_lock_enabled)
    }

    async fn lock_with(&self, reason: LockReason) -> bool {
        let enabled = self.vault_lock_active(&*self.settings.read().await);

        let mut machine = self.machine.lock().await;
        let event = machine.lock(reason, enabled);
        let locked = machine.is_locked();
        let change = self.publish(&machine, event);
        drop(machine);

        if change.is_some() {
            info!("Vault locked ({})", reason);
        } else if !enabled {
            debug!("Lock request ({}) ignored: vault lock disabled", reason);
        }

        self.deliver(change);
        locked
    }

    async fn check_inactivity(&self) -> bool {
        let timeout = {
            let settings = self.settings.read().await;
            if !self.vault_lock_active(&settings) {
                return false;
            }
            match (*settings).as_ref() {
                Some(settings) => settings.lock_timeout(),
                None => return false,
            }
        };

        let last_activity = self.activity.last_activity();
        if !self.activity.is_expired(self.clock.now(), timeout) || self.episode.fired_for(last_activity) {
            return false;
        }

        let mut machine = self.machine.lock().await;
        if machine.is_locked() {
            return false;
        }

        // Activity may have arrived while waiting for the machine
        let last_activity = self.activity.last_activity();
        if !self.activity.is_expired(self.clock.now(), timeout) || !self.episode.claim(last_activity) {
            return false;
        }

        let event = machine.lock(LockReason::Timeout, true);
        let change = self.publish(&machine, event);
        drop(machine);

        info!(
            "Vault locked after {} minutes of inactivity",
            timeout.num_minutes()
        );
        self.deliver(change);
        true
    }

    /// Save settings, then refresh the cache from the store
    ///
    /// The cache is only replaced after the save succeeded, so it never
    /// diverges from durable state.
    async fn commit_settings(
        self: &Arc<Self>,
        cache: &mut RwLockWriteGuard<'_, Option<SecuritySettings>>,
        next: SecuritySettings,
    ) -> Result<(), PersistenceError> {
        if let Err(e) = self.repository.save(&self.account, &next).await {
            warn!("Failed to save security settings: {}", e);
            return Err(e);
        }

        let stored = match self.repository.load(&self.account).await {
            Ok(Some(stored)) => stored,
            Ok(None) => next,
            Err(e) => {
                warn!("Failed to re-read security settings after save: {}", e);
                next
            }
        };

        let vault_lock_enabled = stored.vault_lock_enabled;
        **cache = Some(stored);
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("Settings store reachable again, leaving degraded mode");
            if vault_lock_enabled && !self.monitor.is_running() {
                self.activity.touch(self.clock.now());
                self.start_monitor();
            }
        }
        Ok(())
    }

    /// Bring monitor and lock state in line with the vault lock switch
    async fn apply_enablement(self: &Arc<Self>, enabled: bool) -> Option<StateChange> {
        if enabled {
            if !self.monitor.is_running() {
                self.activity.touch(self.clock.now());
                self.start_monitor();
            }
            return None;
        }

        self.monitor.stop();
        let mut machine = self.machine.lock().await;
        let event = machine.force_unlock();
        self.publish(&machine, event)
    }

    fn start_monitor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.monitor.start(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.check_inactivity().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
    }

    /// Publish the machine's state and pair it with the event, if any
    fn publish(&self, machine: &LockStateMachine, event: Option<LockEvent>) -> Option<StateChange> {
        let state = machine.snapshot(self.activity.last_activity());
        self.snapshot.send_replace(state.clone());
        event.map(|event| StateChange { event, state })
    }

    fn deliver(&self, change: Option<StateChange>) {
        if let Some(change) = change {
            debug!("Lock state change: {:?}", change.event);
            self.subscribers.notify(&change);
        }
    }
}
