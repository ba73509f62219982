//! Last-interaction tracking
//!
//! The UI touches the tracker on every user interaction; the activity monitor
//! reads it to decide whether the inactivity timeout has elapsed. Touching is
//! lock-free so it can be called from any input handler.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::clock::from_millis;

/// Timestamp of the most recent user interaction
#[derive(Debug)]
pub struct ActivityTracker {
    last_activity_ms: AtomicI64,
}

impl ActivityTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Record activity (resets the idle period)
    pub fn touch(&self, now: DateTime<Utc>) {
        self.last_activity_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        from_millis(self.last_activity_ms.load(Ordering::SeqCst))
    }

    /// Time since last activity; never negative
    pub fn idle_time(&self, now: DateTime<Utc>) -> Duration {
        let idle = now - self.last_activity();
        if idle < Duration::zero() {
            Duration::zero()
        } else {
            idle
        }
    }

    /// Whether the idle period has reached the timeout
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.idle_time(now) >= timeout
    }

    /// Remaining time until the timeout, in whole seconds
    pub fn remaining_seconds(&self, now: DateTime<Utc>, timeout: Duration) -> u64 {
        (timeout - self.idle_time(now)).num_seconds().max(0) as u64
    }

    /// Format remaining time as MM:SS
    pub fn remaining_formatted(&self, now: DateTime<Utc>, timeout: Duration) -> String {
        let secs = self.remaining_seconds(now, timeout);
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}
