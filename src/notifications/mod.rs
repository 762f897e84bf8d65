//! Self-expiring toast queue.
//!
//! [`NotificationQueue::push`] appends a toast and schedules its removal
//! after the display duration. Views read the list through
//! [`NotificationQueue::snapshot`] or re-render on every change via
//! [`NotificationQueue::watch`].
//!
//! The queue is a cheap cloneable handle. Expiry tasks hold only a weak
//! reference, so dropping the last handle aborts every pending timer and
//! frees the list.
//!
//! # Example
//!
//! ```ignore
//! let queue = NotificationQueue::new(Duration::from_secs(4));
//! let id = queue.push(NotificationKind::Success, "Report exported");
//! queue.remove(id); // dismissed early; the timer is cancelled
//! ```

pub mod router;

pub use router::NotificationRouter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::constants::NOTIFICATION_DISPLAY_DURATION;

/// Process-wide id source; ids are unique across queues.
static NEXT_NOTIFICATION_ID: AtomicU64 = AtomicU64::new(1);

/// Toast severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Action succeeded.
    Success,
    /// Action or event failed.
    Error,
    /// Neutral information.
    #[default]
    Info,
    /// Needs attention.
    Warning,
}

impl NotificationKind {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Process-unique, increasing.
    pub id: u64,
    /// Severity.
    pub kind: NotificationKind,
    /// Text to show.
    pub message: String,
    /// When it was pushed.
    pub created_at: DateTime<Utc>,
}

struct Inner {
    items: watch::Sender<Vec<Notification>>,
    timers: Mutex<HashMap<u64, JoinHandle<()>>>,
    display_duration: Duration,
}

impl Inner {
    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the item with `id`. Returns whether it was present.
    fn remove_item(&self, id: u64) -> bool {
        let mut removed = false;
        self.items.send_if_modified(|items| {
            let before = items.len();
            items.retain(|item| item.id != id);
            removed = items.len() != before;
            removed
        });
        removed
    }

    /// Called by the expiry task itself; leaves its own handle alone.
    fn expire(&self, id: u64) {
        self.timers().remove(&id);
        if self.remove_item(id) {
            log::debug!("[notifications] Expired {id}");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, timer) in self.timers().drain() {
            timer.abort();
        }
    }
}

/// Toast list with automatic expiry.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("len", &self.len())
            .field("pending_timers", &self.inner.timers().len())
            .field("display_duration", &self.inner.display_duration)
            .finish()
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(NOTIFICATION_DISPLAY_DURATION)
    }
}

impl NotificationQueue {
    /// Empty queue whose toasts live for `display_duration`.
    pub fn new(display_duration: Duration) -> Self {
        let (items, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                items,
                timers: Mutex::new(HashMap::new()),
                display_duration,
            }),
        }
    }

    /// Append a toast and schedule its removal. Returns the new id.
    ///
    /// Outside a tokio runtime no timer can be scheduled; the toast then
    /// stays until [`NotificationQueue::remove`] is called.
    pub fn push(&self, kind: NotificationKind, message: impl Into<String>) -> u64 {
        let id = NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::Relaxed);
        let notification = Notification {
            id,
            kind,
            message: message.into(),
            created_at: Utc::now(),
        };
        log::debug!("[notifications] {} {}: {}", kind, id, notification.message);
        self.inner.items.send_modify(|items| items.push(notification));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                let delay = self.inner.display_duration;
                let mut timers = self.inner.timers();
                let timer = handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.expire(id);
                    }
                });
                timers.insert(id, timer);
            }
            Err(_) => {
                log::warn!("[notifications] No runtime; toast {id} will not auto-expire");
            }
        }

        id
    }

    /// Remove a toast now and cancel its timer.
    ///
    /// Returns `false` if it was already gone (expired or removed).
    pub fn remove(&self, id: u64) -> bool {
        if let Some(timer) = self.inner.timers().remove(&id) {
            timer.abort();
        }
        self.inner.remove_item(id)
    }

    /// Remove every toast and cancel every timer.
    pub fn clear(&self) {
        for (_, timer) in self.inner.timers().drain() {
            timer.abort();
        }
        self.inner.items.send_if_modified(|items| {
            let changed = !items.is_empty();
            items.clear();
            changed
        });
    }

    /// Current toasts, oldest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.inner.items.borrow().clone()
    }

    /// Number of visible toasts.
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// Whether no toast is visible.
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Receiver notified on every change to the list.
    pub fn watch(&self) -> watch::Receiver<Vec<Notification>> {
        self.inner.items.subscribe()
    }

    /// Configured toast lifetime.
    pub fn display_duration(&self) -> Duration {
        self.inner.display_duration
    }
}
