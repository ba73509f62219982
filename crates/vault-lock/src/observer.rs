//! State change subscribers
//!
//! Callbacks are keyed by the identity of their [`StateSubscriber`] handle.
//! Registering the same handle again is a no-op, so a UI component that
//! re-registers on every mount still receives one notification per
//! transition. Async consumers can take a broadcast receiver instead.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use crate::state::StateChange;

/// Capacity of the broadcast channel for async subscribers
const EVENT_CHANNEL_CAPACITY: usize = 32;

type Callback = dyn Fn(&StateChange) + Send + Sync;

/// Stable handle for a state change callback
///
/// Clones share identity: registering any clone of a handle that is already
/// registered does nothing.
#[derive(Clone)]
pub struct StateSubscriber(Arc<Callback>);

impl StateSubscriber {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    fn same_as(&self, other: &StateSubscriber) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }

    fn call(&self, change: &StateChange) {
        (self.0)(change)
    }
}

impl fmt::Debug for StateSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateSubscriber({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Registration identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Entries {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, StateSubscriber)>,
}

/// Deduplicated callback list plus broadcast channel
pub struct SubscriberRegistry {
    entries: Mutex<Entries>,
    events: broadcast::Sender<StateChange>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: Mutex::new(Entries::default()),
            events,
        })
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback unless the same handle is already registered
    pub fn register(self: &Arc<Self>, subscriber: &StateSubscriber) -> Subscription {
        let mut entries = self.entries();

        let existing = entries
            .subscribers
            .iter()
            .find(|(_, registered)| registered.same_as(subscriber))
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => {
                debug!("Subscriber {:?} already registered", subscriber);
                id
            }
            None => {
                let id = SubscriptionId(entries.next_id);
                entries.next_id += 1;
                entries.subscribers.push((id, subscriber.clone()));
                id
            }
        };

        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove one registration; false if it was already gone
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries();
        let before = entries.subscribers.len();
        entries.subscribers.retain(|(registered, _)| *registered != id);
        entries.subscribers.len() != before
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.entries().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver for every future state change
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Deliver a change to every callback and broadcast receiver
    ///
    /// Callbacks run outside the registry lock, so they may register or
    /// unsubscribe without deadlocking.
    pub fn notify(&self, change: &StateChange) {
        let subscribers: Vec<StateSubscriber> = self
            .entries()
            .subscribers
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect();

        for subscriber in &subscribers {
            subscriber.call(change);
        }

        // No receivers is fine
        let _ = self.events.send(change.clone());
    }
}

/// Disposer returned by a registration
#[must_use = "dropping a Subscription keeps the callback registered"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the registration this disposer was issued for
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}
