//! Lock state machine
//!
//! The machine has two states, `Unlocked` and `Locked(reason)`. A locked
//! state carries its failed-attempt count, so an unlocked machine has neither
//! a reason nor attempts by construction.
//!
//! | From      | Event            | Guard             | To               |
//! |-----------|------------------|-------------------|------------------|
//! | Unlocked  | lock(r)          | vault lock on     | Locked(r)        |
//! | Locked(r) | unlock(true)     | attempts < max    | Unlocked         |
//! | Locked(r) | unlock(false)    | attempts < max    | Locked(r), +1    |
//! | Locked(r) | unlock(_)        | attempts >= max   | refused          |
//! | Locked(r) | lock(r')         | -                 | Locked(r')       |
//! | any       | force_unlock     | -                 | Unlocked         |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lockout::LockoutPolicy;

/// Why the vault became locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockReason {
    /// Inactivity timeout elapsed
    Timeout,
    /// User locked the vault
    Manual,
    /// Application went to the background
    Minimize,
    /// Vault lock enabled at application start
    Startup,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockReason::Timeout => "timeout",
            LockReason::Manual => "manual",
            LockReason::Minimize => "minimize",
            LockReason::Startup => "startup",
        };
        f.write_str(name)
    }
}

/// Snapshot of the lock state handed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub is_locked: bool,
    pub lock_reason: Option<LockReason>,
    pub last_activity: DateTime<Utc>,
    pub unlock_attempts: u32,
    pub max_attempts: u32,
}

impl LockState {
    /// Attempts left before lockout
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.unlock_attempts)
    }

    pub fn is_locked_out(&self) -> bool {
        self.is_locked && self.unlock_attempts >= self.max_attempts
    }
}

/// What a transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockEvent {
    /// Unlocked -> Locked
    Locked(LockReason),
    /// Already locked; the reason was replaced
    Relocked(LockReason),
    /// Locked -> Unlocked after a verified credential
    Unlocked,
    /// Credential rejected; still locked
    AttemptFailed { attempts: u32, remaining: u32 },
    /// Credential rejected and the attempt budget is now spent
    LockedOut,
    /// Locked -> Unlocked because the vault lock was turned off
    ForceUnlocked,
}

/// A transition together with the state it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub event: LockEvent,
    pub state: LockState,
}

/// Result of an unlock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockOutcome {
    /// Credential accepted, vault unlocked
    Unlocked,
    /// Credential rejected
    Rejected { remaining_attempts: u32 },
    /// Attempt budget spent; the credential was not evaluated
    LockedOut,
    /// Vault was not locked; the credential was not evaluated
    NotLocked,
}

impl UnlockOutcome {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, UnlockOutcome::Unlocked)
    }
}

/// Whether an unlock attempt may evaluate a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockGate {
    Open,
    NotLocked,
    LockedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unlocked,
    Locked { reason: LockReason, attempts: u32 },
}

/// Authoritative lock state
#[derive(Debug, Clone)]
pub struct LockStateMachine {
    phase: Phase,
    policy: LockoutPolicy,
}

impl LockStateMachine {
    /// Create an unlocked machine; the service applies the startup decision
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            phase: Phase::Unlocked,
            policy,
        }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.phase, Phase::Locked { .. })
    }

    pub fn lock_reason(&self) -> Option<LockReason> {
        match self.phase {
            Phase::Locked { reason, .. } => Some(reason),
            Phase::Unlocked => None,
        }
    }

    pub fn unlock_attempts(&self) -> u32 {
        match self.phase {
            Phase::Locked { attempts, .. } => attempts,
            Phase::Unlocked => 0,
        }
    }

    pub fn snapshot(&self, last_activity: DateTime<Utc>) -> LockState {
        LockState {
            is_locked: self.is_locked(),
            lock_reason: self.lock_reason(),
            last_activity,
            unlock_attempts: self.unlock_attempts(),
            max_attempts: self.policy.max_attempts,
        }
    }

    /// Lock the vault
    ///
    /// From `Unlocked` this only happens while the vault lock is enabled.
    /// An already locked vault keeps its attempt count and takes the new
    /// reason. Returns `None` when nothing changed.
    pub fn lock(&mut self, reason: LockReason, vault_lock_enabled: bool) -> Option<LockEvent> {
        match self.phase {
            Phase::Unlocked if !vault_lock_enabled => None,
            Phase::Unlocked => {
                self.phase = Phase::Locked { reason, attempts: 0 };
                Some(LockEvent::Locked(reason))
            }
            Phase::Locked { reason: current, .. } if current == reason => None,
            Phase::Locked { attempts, .. } => {
                self.phase = Phase::Locked { reason, attempts };
                Some(LockEvent::Relocked(reason))
            }
        }
    }

    /// Check whether a credential may be evaluated at all
    pub fn unlock_gate(&self) -> UnlockGate {
        match self.phase {
            Phase::Unlocked => UnlockGate::NotLocked,
            Phase::Locked { attempts, .. } if self.policy.is_locked_out(attempts) => {
                UnlockGate::LockedOut
            }
            Phase::Locked { .. } => UnlockGate::Open,
        }
    }

    /// Apply the result of a credential check
    pub fn unlock(&mut self, success: bool) -> (UnlockOutcome, Option<LockEvent>) {
        let (reason, attempts) = match self.phase {
            Phase::Unlocked => return (UnlockOutcome::NotLocked, None),
            Phase::Locked { reason, attempts } => (reason, attempts),
        };

        if self.policy.is_locked_out(attempts) {
            return (UnlockOutcome::LockedOut, None);
        }

        if success {
            self.phase = Phase::Unlocked;
            return (UnlockOutcome::Unlocked, Some(LockEvent::Unlocked));
        }

        let attempts = attempts + 1;
        self.phase = Phase::Locked { reason, attempts };
        let remaining = self.policy.remaining(attempts);

        let event = if remaining == 0 {
            LockEvent::LockedOut
        } else {
            LockEvent::AttemptFailed { attempts, remaining }
        };
        (
            UnlockOutcome::Rejected {
                remaining_attempts: remaining,
            },
            Some(event),
        )
    }

    /// Unlock unconditionally; used only when the vault lock is turned off
    pub fn force_unlock(&mut self) -> Option<LockEvent> {
        match self.phase {
            Phase::Unlocked => None,
            Phase::Locked { .. } => {
                self.phase = Phase::Unlocked;
                Some(LockEvent::ForceUnlocked)
            }
        }
    }
}
