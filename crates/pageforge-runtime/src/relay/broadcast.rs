#![forbid(unsafe_code)]

//! Same-window broadcast of tree updates.
//!
//! [`EventBus`] is the in-process analogue of dispatching a custom DOM event
//! named [`ELEMENTS_UPDATED_EVENT`]. Listeners receive the whole sanitized
//! tree and replace their view with it.
//!
//! Subscriptions are RAII: dropping a [`BusSubscription`] removes its
//! listener.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use pageforge_core::ElementTree;
use serde::{Deserialize, Serialize};

/// Name of the update event.
pub const ELEMENTS_UPDATED_EVENT: &str = "pageforge:elements-updated";

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementsUpdated {
    /// Sanitized root sequence.
    pub elements: ElementTree,
}

type Listener = Arc<dyn Fn(&ElementsUpdated) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Broadcast bus. Clones share the listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Listeners>>,
}

fn lock(inner: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl EventBus {
    /// Bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered while the returned
    /// subscription lives.
    #[must_use = "dropping the subscription removes the listener"]
    pub fn subscribe(
        &self,
        listener: impl Fn(&ElementsUpdated) + Send + Sync + 'static,
    ) -> BusSubscription {
        let mut guard = lock(&self.inner);
        let id = guard.next_id;
        guard.next_id += 1;
        guard.entries.push((id, Arc::new(listener)));
        BusSubscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver `event` to every listener. Returns how many were notified.
    ///
    /// Listeners run outside the lock, so a listener may subscribe or drop
    /// subscriptions without deadlocking.
    pub fn emit(&self, event: &ElementsUpdated) -> usize {
        let snapshot: Vec<Listener> = lock(&self.inner)
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &snapshot {
            listener(event);
        }
        tracing::trace!(
            target: "pageforge.relay",
            event = ELEMENTS_UPDATED_EVENT,
            listeners = snapshot.len(),
            "broadcast emitted"
        );
        snapshot.len()
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).entries.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered. Drop to unsubscribe.
pub struct BusSubscription {
    bus: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            lock(&inner).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSubscription").field("id", &self.id).finish()
    }
}
