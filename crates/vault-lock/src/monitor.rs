//! Inactivity monitor task
//!
//! A periodic tokio task with an explicit start/stop lifecycle. The task
//! itself knows nothing about lock state: each tick calls back into the
//! service, which decides whether the timeout elapsed. Resolution of the
//! timeout is bounded by the poll interval.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const NO_EPISODE: i64 = i64::MIN;

/// Cancellable periodic task
pub struct ActivityMonitor {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.task()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Start ticking; no-op if already running
    ///
    /// The task ends when `tick` returns `ControlFlow::Break` or on `stop`.
    /// Returns false if no tokio runtime is available.
    pub fn start<F, Fut>(&self, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut task = self.task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return true;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot start activity monitor without a runtime: {}", e);
                return false;
            }
        };

        let period = self.interval;
        *task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if tick().await.is_break() {
                    debug!("Activity monitor finished");
                    break;
                }
            }
        }));

        debug!("Activity monitor started ({:?} interval)", period);
        true
    }

    /// Stop ticking; returns whether a task was running
    pub fn stop(&self) -> bool {
        match self.task().take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                debug!("Activity monitor stopped");
                was_running
            }
            None => false,
        }
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }
}

/// Remembers which inactivity episode already produced a timeout lock
///
/// An episode is identified by the `last_activity` stamp it started from, so
/// a fresh interaction opens a new episode and the same one never fires twice.
#[derive(Debug)]
pub struct TimeoutEpisode {
    fired_for_ms: AtomicI64,
}

impl TimeoutEpisode {
    pub fn new() -> Self {
        Self {
            fired_for_ms: AtomicI64::new(NO_EPISODE),
        }
    }

    /// Claim the episode; true only for the first claim of a given stamp
    pub fn claim(&self, last_activity: DateTime<Utc>) -> bool {
        let stamp = last_activity.timestamp_millis();
        self.fired_for_ms.swap(stamp, Ordering::SeqCst) != stamp
    }

    /// Whether the episode starting at `last_activity` already fired
    pub fn fired_for(&self, last_activity: DateTime<Utc>) -> bool {
        self.fired_for_ms.load(Ordering::SeqCst) == last_activity.timestamp_millis()
    }
}

impl Default for TimeoutEpisode {
    fn default() -> Self {
        Self::new()
    }
}
