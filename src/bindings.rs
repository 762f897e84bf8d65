//! View-facing adapters over the multiplexer.
//!
//! Each binding owns the [`Subscription`]s it needs, so dropping the binding
//! is all a view has to do on teardown. State is published through
//! `tokio::sync::watch` channels: read the current value with `get`/`with`,
//! or await `changed()` to re-render.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::events::{AuditProgress, DeviceStatus, Subscription, Topic};
use crate::multiplexer::Multiplexer;
use crate::transport::ConnectionStatus;

// =============================================================================
// Connection indicator
// =============================================================================

/// Current connection status of one multiplexer, for a status badge.
#[derive(Debug, Clone)]
pub struct ConnectionIndicator {
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionIndicator {
    /// Follow `multiplexer`'s transport.
    pub fn new(multiplexer: &Multiplexer) -> Self {
        Self {
            status: multiplexer.status_watch(),
        }
    }

    /// Latest status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Short human-readable label for the latest status.
    pub fn label(&self) -> &'static str {
        match self.status() {
            ConnectionStatus::Connected => "Live",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Error => "Connection problem",
            ConnectionStatus::Disconnected => "Offline",
        }
    }

    /// Wait for the next status change.
    ///
    /// Returns `None` once the transport is gone.
    pub async fn changed(&mut self) -> Option<ConnectionStatus> {
        self.status.changed().await.ok()?;
        Some(*self.status.borrow_and_update())
    }
}

// =============================================================================
// Generic live state
// =============================================================================

/// A value seeded from a REST fetch and kept current by one topic.
///
/// Every decoded event of topic `E` is folded into the value with the
/// reducer.
pub struct LiveState<T> {
    state: Arc<watch::Sender<T>>,
    subscription: Subscription,
}

impl<T: std::fmt::Debug> std::fmt::Debug for LiveState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveState")
            .field("topic", &self.subscription.topic())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<T> LiveState<T>
where
    T: Send + Sync + 'static,
{
    /// Start from `initial` and apply `reducer` to each `E` event.
    pub fn new<E, F>(multiplexer: &Multiplexer, initial: T, reducer: F) -> Self
    where
        E: Topic,
        F: Fn(&mut T, E) + Send + Sync + 'static,
    {
        let (sender, _) = watch::channel(initial);
        let state = Arc::new(sender);
        let writer = Arc::clone(&state);
        let subscription = multiplexer.subscribe_to::<E, _>(move |event| {
            writer.send_modify(|value| reducer(value, event));
        });
        Self {
            state,
            subscription,
        }
    }

    /// Run `f` against the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.borrow())
    }

    /// Replace the value, e.g. after a REST re-fetch.
    pub fn reset(&self, value: T) {
        self.state.send_replace(value);
    }

    /// Receiver notified after every applied event.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    /// Topic this state follows.
    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }
}

impl<T> LiveState<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.state.borrow().clone()
    }
}

// =============================================================================
// Boards
// =============================================================================

/// Latest status per device.
#[derive(Debug)]
pub struct DeviceStatusBoard {
    devices: LiveState<HashMap<String, DeviceStatus>>,
}

impl DeviceStatusBoard {
    /// Seed with the device list from the REST collaborator.
    pub fn new(multiplexer: &Multiplexer, initial: impl IntoIterator<Item = DeviceStatus>) -> Self {
        let initial = initial
            .into_iter()
            .map(|device| (device.device_id.clone(), device))
            .collect();
        Self {
            devices: LiveState::new::<DeviceStatus, _>(multiplexer, initial, |devices, update| {
                devices.insert(update.device_id.clone(), update);
            }),
        }
    }

    /// Status label of one device.
    pub fn status(&self, device_id: &str) -> Option<String> {
        self.devices
            .with(|devices| devices.get(device_id).map(|d| d.status.clone()))
    }

    /// All devices, sorted by id.
    pub fn devices(&self) -> Vec<DeviceStatus> {
        let mut devices: Vec<_> = self.devices.with(|d| d.values().cloned().collect());
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.with(HashMap::len)
    }

    /// Whether no device is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver notified on every update.
    pub fn watch(&self) -> watch::Receiver<HashMap<String, DeviceStatus>> {
        self.devices.watch()
    }
}

/// Latest progress per running audit.
#[derive(Debug)]
pub struct AuditProgressBoard {
    audits: LiveState<HashMap<String, AuditProgress>>,
}

impl AuditProgressBoard {
    /// Empty board.
    pub fn new(multiplexer: &Multiplexer) -> Self {
        Self {
            audits: LiveState::new::<AuditProgress, _>(
                multiplexer,
                HashMap::new(),
                |audits, update| {
                    audits.insert(update.audit_id.clone(), update);
                },
            ),
        }
    }

    /// Progress of one audit, in percent.
    pub fn progress(&self, audit_id: &str) -> Option<f64> {
        self.audits
            .with(|audits| audits.get(audit_id).map(|a| a.progress))
    }

    /// Stage label of one audit, if the server sent one.
    pub fn stage(&self, audit_id: &str) -> Option<String> {
        self.audits
            .with(|audits| audits.get(audit_id).and_then(|a| a.stage.clone()))
    }

    /// Forget an audit, e.g. once it completed.
    pub fn remove(&self, audit_id: &str) {
        self.audits.state.send_if_modified(|audits| audits.remove(audit_id).is_some());
    }

    /// Number of tracked audits.
    pub fn len(&self) -> usize {
        self.audits.with(HashMap::len)
    }

    /// Whether no audit is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::StaticCredentials;
    use crate::events::{AuditStarted, DEVICE_STATUS_TOPIC};

    fn mux() -> Multiplexer {
        Multiplexer::new(&Config::default(), Arc::new(StaticCredentials::none()))
    }

    fn device(id: &str, status: &str) -> DeviceStatus {
        DeviceStatus {
            device_id: id.to_string(),
            status: status.to_string(),
            last_seen: None,
        }
    }

    #[test]
    fn test_indicator_starts_offline() {
        let mux = mux();
        let indicator = ConnectionIndicator::new(&mux);
        assert_eq!(indicator.status(), ConnectionStatus::Disconnected);
        assert_eq!(indicator.label(), "Offline");
    }

    #[tokio::test]
    async fn test_indicator_ends_when_transport_dropped() {
        let mux = mux();
        let mut indicator = ConnectionIndicator::new(&mux);
        drop(mux);
        assert_eq!(indicator.changed().await, None);
    }

    #[test]
    fn test_live_state_applies_reducer() {
        let mux = mux();
        let started = LiveState::new::<AuditStarted, _>(&mux, Vec::<String>::new(), |ids, e| {
            ids.push(e.audit_id);
        });
        assert_eq!(started.topic(), AuditStarted::NAME);

        mux.publish_inbound(r#"{"event":"audit:started","data":{"auditId":"a1"}}"#);
        mux.publish_inbound(r#"{"event":"audit:started","data":{"auditId":"a2"}}"#);
        assert_eq!(started.get(), vec!["a1".to_string(), "a2".to_string()]);

        started.reset(Vec::new());
        assert!(started.get().is_empty());
    }

    #[test]
    fn test_dropping_live_state_unsubscribes() {
        let mux = mux();
        let state = LiveState::new::<AuditStarted, _>(&mux, 0_u32, |n, _| *n += 1);
        assert_eq!(mux.listener_count(AuditStarted::NAME), 1);
        drop(state);
        assert_eq!(mux.listener_count(AuditStarted::NAME), 0);
    }

    #[test]
    fn test_device_board_merges_updates() {
        let mux = mux();
        let board = DeviceStatusBoard::new(&mux, [device("cam-2", "online"), device("cam-1", "online")]);
        assert_eq!(board.len(), 2);

        mux.publish_inbound(r#"{"event":"device:status","data":{"deviceId":"cam-1","status":"offline"}}"#);
        mux.publish_inbound(r#"{"event":"device:status","data":{"deviceId":"lock-9","status":"scanning"}}"#);

        assert_eq!(board.status("cam-1").as_deref(), Some("offline"));
        assert_eq!(board.status("lock-9").as_deref(), Some("scanning"));
        assert_eq!(
            board.devices().iter().map(|d| d.device_id.as_str()).collect::<Vec<_>>(),
            vec!["cam-1", "cam-2", "lock-9"]
        );
    }

    #[test]
    fn test_device_board_ignores_malformed_updates() {
        let mux = mux();
        let board = DeviceStatusBoard::new(&mux, [device("cam-1", "online")]);
        mux.publish_local(DEVICE_STATUS_TOPIC, &serde_json::json!({"status": "offline"}));
        assert_eq!(board.status("cam-1").as_deref(), Some("online"));
    }

    #[test]
    fn test_audit_board_tracks_latest_progress() {
        let mux = mux();
        let board = AuditProgressBoard::new(&mux);
        assert!(board.is_empty());

        mux.publish_inbound(r#"{"event":"audit:progress","data":{"auditId":"a1","progress":10}}"#);
        mux.publish_inbound(r#"{"event":"audit:progress","data":{"auditId":"a1","progress":55.5,"stage":"port scan"}}"#);

        assert_eq!(board.progress("a1"), Some(55.5));
        assert_eq!(board.stage("a1").as_deref(), Some("port scan"));
        assert_eq!(board.progress("a2"), None);

        board.remove("a1");
        assert!(board.is_empty());
    }
}
