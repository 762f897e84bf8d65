//! Per-topic listener lists with reference counting.
//!
//! Each topic maps to an ordered list of listeners. A topic entry exists only
//! while it has at least one listener, so `topics()` never reports stale
//! names and an unsubscribed topic leaves nothing behind.
//!
//! Dispatch takes a snapshot under the lock and invokes listeners after
//! releasing it, so a listener may subscribe or unsubscribe (itself or others)
//! without deadlocking. A listener removed mid-dispatch is skipped for the
//! rest of that dispatch via its `active` flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

/// A registered callback.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifier unique within one registry.
pub type ListenerId = u64;

struct Entry {
    id: ListenerId,
    active: Arc<AtomicBool>,
    callback: Listener,
}

/// Listener storage for one multiplexer.
#[derive(Default)]
pub struct TopicRegistry {
    topics: HashMap<String, Vec<Entry>>,
    next_id: ListenerId,
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topic_count", &self.topics.len())
            .field("total_listeners", &self.total_listeners())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// A listener captured for one dispatch.
pub(crate) struct Snapshot {
    active: Arc<AtomicBool>,
    callback: Listener,
}

impl Snapshot {
    /// Whether the listener is still subscribed.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn callback(&self) -> &Listener {
        &self.callback
    }
}

impl TopicRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener to `topic`, creating the topic entry if needed.
    fn register(&mut self, topic: &str, callback: Listener) -> (ListenerId, Arc<AtomicBool>) {
        let id = self.next_id;
        self.next_id += 1;
        let active = Arc::new(AtomicBool::new(true));

        self.topics.entry(topic.to_string()).or_default().push(Entry {
            id,
            active: Arc::clone(&active),
            callback,
        });

        log::debug!("[events] Registered listener {id} for '{topic}'");
        (id, active)
    }

    /// Remove one listener. Drops the topic entry once it is empty.
    ///
    /// Returns `false` if the listener was not registered.
    fn unregister(&mut self, topic: &str, id: ListenerId) -> bool {
        let Some(entries) = self.topics.get_mut(topic) else {
            return false;
        };
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };

        let entry = entries.remove(index);
        entry.active.store(false, Ordering::Release);
        if entries.is_empty() {
            self.topics.remove(topic);
        }

        log::debug!("[events] Unregistered listener {id} from '{topic}'");
        true
    }

    /// Listeners for `topic` in registration order.
    pub(crate) fn snapshot(&self, topic: &str) -> Vec<Snapshot> {
        self.topics
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| Snapshot {
                        active: Arc::clone(&entry.active),
                        callback: Arc::clone(&entry.callback),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of listeners on `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    /// Whether `topic` has any listener.
    pub fn has_listeners(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Listeners across all topics.
    pub fn total_listeners(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }

    /// Topics with at least one listener, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }
}

/// Shared handle to a registry.
pub type SharedTopicRegistry = Arc<Mutex<TopicRegistry>>;

/// Lock a registry, recovering from poisoning.
///
/// A listener panic never happens under this lock, but a poisoned lock must
/// not take the whole event pipeline down either.
pub(crate) fn lock(registry: &Mutex<TopicRegistry>) -> std::sync::MutexGuard<'_, TopicRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register `callback` on `topic` and return its disposer.
pub(crate) fn subscribe(
    registry: &SharedTopicRegistry,
    topic: &str,
    callback: Listener,
) -> Subscription {
    let (id, active) = lock(registry).register(topic, callback);
    Subscription {
        registry: Arc::downgrade(registry),
        topic: topic.to_string(),
        id,
        active,
    }
}

/// Disposer returned by `subscribe`.
///
/// Removes exactly its own listener, once. [`Subscription::unsubscribe`] and
/// [`Subscription::dispose`] are idempotent, and dropping the guard
/// unsubscribes too. Use [`Subscription::detach`] to keep the listener for
/// the registry's lifetime.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<Mutex<TopicRegistry>>,
    topic: String,
    id: ListenerId,
    active: Arc<AtomicBool>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Topic this listener is on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Listener id.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).unregister(&self.topic, self.id);
        }
    }

    /// Remove the listener, consuming the disposer.
    pub fn dispose(self) {
        self.unsubscribe();
    }

    /// Keep the listener registered for as long as the registry lives.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
