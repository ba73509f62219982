//! Failed-attempt lockout policy
//!
//! Every rejected credential counts against a fixed budget. Once the budget
//! is spent the vault refuses further attempts outright, without evaluating
//! the credential. There is no cooldown: the lockout lasts until the vault
//! lock is disabled or the process restarts.

use serde::{Deserialize, Serialize};

/// Default number of failed unlocks before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Failed-attempt budget
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Failed attempts allowed before unlocks are refused
    pub max_attempts: u32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempts left before lockout
    pub fn remaining(&self, failed_attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(failed_attempts)
    }

    /// Whether the budget is spent
    pub fn is_locked_out(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }

    /// Human-readable description for the unlock prompt
    pub fn describe(&self, failed_attempts: u32) -> String {
        match self.remaining(failed_attempts) {
            0 => "Too many failed attempts - unlocking is disabled".to_string(),
            1 => "1 attempt remaining".to_string(),
            n => format!("{} attempts remaining", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.remaining(0), 5);
        assert!(!policy.is_locked_out(4));
        assert!(policy.is_locked_out(5));
    }

    #[test]
    fn test_remaining_saturates() {
        let policy = LockoutPolicy::new(3);
        assert_eq!(policy.remaining(2), 1);
        assert_eq!(policy.remaining(3), 0);
        assert_eq!(policy.remaining(100), 0);
    }

    #[test]
    fn test_zero_budget_is_raised_to_one() {
        assert_eq!(LockoutPolicy::new(0).max_attempts, 1);
    }

    #[test]
    fn test_describe() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.describe(0), "5 attempts remaining");
        assert_eq!(policy.describe(4), "1 attempt remaining");
        assert!(policy.describe(5).contains("disabled"));
    }
}
