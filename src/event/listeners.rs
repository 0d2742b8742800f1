//! Listener registries.
//!
//! A registry maps event kinds to subscriber channels. Subscribing returns a
//! [`Subscription`]; dropping it unsubscribes. An optional presence hook
//! fires when the first listener of a kind arrives or the last one leaves.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type PresenceHook<K> = Box<dyn Fn(K, bool) + Send + Sync>;

struct Entry<K, E> {
    kind: K,
    tx: mpsc::UnboundedSender<E>,
}

struct Registry<K, E> {
    next_id: u64,
    entries: HashMap<u64, Entry<K, E>>,
    closed: bool,
    on_presence: Option<PresenceHook<K>>,
}

impl<K: Copy + Eq, E> Registry<K, E> {
    fn has(&self, kind: K) -> bool {
        self.entries.values().any(|entry| entry.kind == kind)
    }

    fn notify(&self, kind: K, present: bool) {
        if let Some(hook) = &self.on_presence {
            hook(kind, present);
        }
    }
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
    fn is_registered(&self, id: u64) -> bool;
}

impl<K, E> Unsubscribe for Mutex<Registry<K, E>>
where
    K: Copy + Eq + Send,
    E: Send,
{
    fn unsubscribe(&self, id: u64) {
        let mut registry = self.lock();
        let Some(entry) = registry.entries.remove(&id) else {
            return;
        };
        if !registry.closed && !registry.has(entry.kind) {
            registry.notify(entry.kind, false);
        }
    }

    fn is_registered(&self, id: u64) -> bool {
        self.lock().entries.contains_key(&id)
    }
}

/// Registry of subscribers for one entity.
pub(crate) struct Listeners<K, E> {
    registry: Arc<Mutex<Registry<K, E>>>,
}

impl<K, E> Listeners<K, E>
where
    K: Copy + Eq + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_presence_hook(hook: impl Fn(K, bool) + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(hook)))
    }

    fn build(on_presence: Option<PresenceHook<K>>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: HashMap::new(),
                closed: false,
                on_presence,
            })),
        }
    }

    /// Subscribe to `kind`. On a closed registry the subscription yields
    /// nothing.
    pub(crate) fn subscribe(&self, kind: K) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock();
        if registry.closed {
            return Subscription { rx, guard: None };
        }

        let id = registry.next_id;
        registry.next_id += 1;
        let first = !registry.has(kind);
        registry.entries.insert(id, Entry { kind, tx });
        if first {
            registry.notify(kind, true);
        }
        drop(registry);

        let weak: Weak<Mutex<Registry<K, E>>> = Arc::downgrade(&self.registry);
        let registry: Weak<dyn Unsubscribe> = weak;
        Subscription {
            rx,
            guard: Some(Guard { id, registry }),
        }
    }

    /// Deliver `event` to every subscriber of `kind`. Returns how many
    /// received it.
    pub(crate) fn emit(&self, kind: K, event: E) -> usize {
        let registry = self.registry.lock();
        registry
            .entries
            .values()
            .filter(|entry| entry.kind == kind)
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    pub(crate) fn count(&self, kind: K) -> usize {
        let registry = self.registry.lock();
        registry
            .entries
            .values()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    /// Drop every subscriber. Pending events stay readable; afterwards each
    /// subscription ends.
    pub(crate) fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        registry.entries.clear();
    }
}

impl<K, E> fmt::Debug for Listeners<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("Listeners")
            .field("count", &registry.entries.len())
            .field("closed", &registry.closed)
            .finish()
    }
}

struct Guard {
    id: u64,
    registry: Weak<dyn Unsubscribe>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

/// Stream of events of one kind. Dropping it unsubscribes.
pub struct Subscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
    guard: Option<Guard>,
}

impl<E> Subscription<E> {
    /// Next event. `None` once the entity finalized and every queued event
    /// was read.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.guard.as_ref().is_some_and(|guard| {
            guard
                .registry
                .upgrade()
                .is_some_and(|registry| registry.is_registered(guard.id))
        })
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.guard.as_ref().map(|guard| guard.id))
            .finish()
    }
}
