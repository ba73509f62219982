//! Inactivity monitor running on a real tokio interval

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{pin_settings, Harness, MockProbe, PIN};
use tokio::time::timeout;
use vault_lock::{Credential, LockEvent, LockReason, ProbeError, StateChange};

const POLL: Duration = Duration::from_millis(10);

fn harness(timeout_minutes: u32) -> Harness {
    Harness::build(Some(pin_settings(timeout_minutes)), MockProbe::face(), POLL)
}

async fn next_change(rx: &mut tokio::sync::broadcast::Receiver<StateChange>) -> StateChange {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no state change within two seconds")
        .unwrap()
}

#[tokio::test]
async fn test_monitor_locks_after_timeout() {
    let h = harness(1);
    h.service.initialize().await.unwrap();
    assert!(h.service.is_monitor_running());
    assert!(h.service.unlock_vault(Credential::pin(PIN)).await);

    let mut rx = h.service.subscribe();
    h.clock.advance(ChronoDuration::minutes(2));

    let change = next_change(&mut rx).await;
    assert_eq!(change.event, LockEvent::Locked(LockReason::Timeout));
    assert_eq!(change.state.lock_reason, Some(LockReason::Timeout));
    h.service.shutdown();
}

#[tokio::test]
async fn test_monitor_fires_once_per_episode() {
    let h = harness(1);
    let (seen, subscriber) = h.record();
    let _subscription = h.service.on_state_change(&subscriber);

    h.service.initialize().await.unwrap();
    h.service.unlock_vault(Credential::pin(PIN)).await;

    let mut rx = h.service.subscribe();
    h.clock.advance(ChronoDuration::minutes(2));
    next_change(&mut rx).await;

    // Many more polls inside the same episode
    tokio::time::sleep(POLL * 10).await;
    let timeouts = |seen: &[StateChange]| {
        seen.iter()
            .filter(|change| change.event == LockEvent::Locked(LockReason::Timeout))
            .count()
    };
    assert_eq!(timeouts(seen.lock().unwrap().as_slice()), 1);

    // Unlocking starts a new episode which may time out again
    h.service.unlock_vault(Credential::pin(PIN)).await;
    next_change(&mut rx).await;
    h.clock.advance(ChronoDuration::minutes(2));
    next_change(&mut rx).await;
    assert_eq!(timeouts(seen.lock().unwrap().as_slice()), 2);
    h.service.shutdown();
}

#[tokio::test]
async fn test_activity_keeps_vault_unlocked() {
    let h = harness(1);
    h.service.initialize().await.unwrap();
    h.service.unlock_vault(Credential::pin(PIN)).await;

    for _ in 0..4 {
        h.clock.advance(ChronoDuration::seconds(40));
        h.service.update_activity();
        tokio::time::sleep(POLL * 3).await;
    }

    assert!(!h.service.get_lock_state().is_locked);
    h.service.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_polling() {
    let h = harness(1);
    h.service.initialize().await.unwrap();
    h.service.unlock_vault(Credential::pin(PIN)).await;

    assert!(h.service.shutdown());
    h.clock.advance(ChronoDuration::minutes(5));
    tokio::time::sleep(POLL * 10).await;

    assert!(!h.service.get_lock_state().is_locked);
    assert!(!h.service.is_monitor_running());
}

#[tokio::test]
async fn test_monitor_skips_while_locked() {
    let h = harness(1);
    h.service.initialize().await.unwrap();
    let mut rx = h.service.subscribe();

    // Locked at startup: elapsed time must not turn the reason into Timeout
    h.clock.advance(ChronoDuration::minutes(5));
    tokio::time::sleep(POLL * 10).await;

    assert_eq!(
        h.service.get_lock_state().lock_reason,
        Some(LockReason::Startup)
    );
    assert!(rx.try_recv().is_err());
    h.service.shutdown();
}

#[tokio::test]
async fn test_leaving_degraded_mode_starts_monitor() {
    let h = Harness::build(
        Some(pin_settings(1)),
        MockProbe::failing(ProbeError::Platform("sensor driver crashed".to_string())),
        POLL,
    );
    assert!(h.service.initialize().await.is_err());
    assert!(!h.service.is_monitor_running());

    // A successful save brings the vault lock back
    assert!(h.service.setup_pin("5678").await.unwrap());
    assert!(h.service.is_monitor_running());

    let mut rx = h.service.subscribe();
    h.clock.advance(ChronoDuration::minutes(2));

    let change = next_change(&mut rx).await;
    assert_eq!(change.event, LockEvent::Locked(LockReason::Timeout));
    assert!(h.service.unlock_vault(Credential::pin("5678")).await);
    h.service.shutdown();
}
