//! Supervised WebSocket connection with capped exponential backoff.
//!
//! [`TransportConnection`] is the handle; the supervisor task owns the socket,
//! the retry timer and the attempt counter. Cancelling the supervisor's token
//! stops everything it owns, so `disconnect()` never leaves a stray timer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Backoff, ConnectionEvent, ConnectionStatus, Dispatch};
use crate::config::Config;
use crate::constants::CLOSE_TIMEOUT;
use crate::credentials::CredentialProvider;
use crate::error::{ConnectError, SendError};
use crate::ws::{self, Inbound, SocketReader, SocketWriter};

/// State shared between the handle and the supervisor task.
#[derive(Debug)]
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
}

impl Shared {
    /// Publish a transition. Only the supervisor (or `disconnect()` after the
    /// supervisor has stopped) calls this.
    fn transition(&self, event: ConnectionEvent) {
        match (&event.reason, event.retry_in_ms) {
            (Some(reason), Some(retry)) => log::warn!(
                "[transport] {} (attempt {}): {}, retry in {}ms",
                event.status,
                event.attempt,
                reason,
                retry
            ),
            (Some(reason), None) => {
                log::warn!("[transport] {} (attempt {}): {}", event.status, event.attempt, reason);
            }
            _ => log::info!("[transport] {}", event.status),
        }
        self.status.send_replace(event.status);
        // Receiver is gone only when the multiplexer is being dropped.
        let _ = self.dispatch.send(Dispatch::Connection(event));
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// Handle to a running supervisor.
#[derive(Debug)]
struct SupervisorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Timing knobs copied out of [`Config`] at construction.
#[derive(Debug, Clone)]
struct Settings {
    url: String,
    backoff: Backoff,
    handshake_timeout: Duration,
    heartbeat_interval: Duration,
    stale_timeout: Duration,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            url: config.events_url(),
            backoff: config.backoff(),
            handshake_timeout: config.handshake_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            stale_timeout: config.stale_timeout(),
        }
    }
}

/// One WebSocket to the server event endpoint.
///
/// Create with [`TransportConnection::new`], which also returns the receiving
/// end of the dispatch queue. The multiplexer owns both.
pub struct TransportConnection {
    settings: Settings,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    supervisor: Option<SupervisorHandle>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("url", &self.settings.url)
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TransportConnection {
    /// Create a disconnected transport and its dispatch queue.
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let transport = Self {
            settings: Settings::from_config(config),
            credentials,
            shared: Arc::new(Shared {
                status: status_tx,
                dispatch: dispatch_tx,
            }),
            outbound: None,
            supervisor: None,
        };
        (transport, dispatch_rx)
    }

    /// Current state.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Receiver that observes every state change.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Whether a supervisor is alive (connecting, connected, or waiting to
    /// retry).
    pub fn is_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|supervisor| !supervisor.task.is_finished())
    }

    /// Event socket URL this transport dials.
    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Start connecting.
    ///
    /// A no-op while connecting, connected, or waiting for a scheduled retry.
    /// Suspends until the first attempt settles; a failed attempt is reported
    /// through status and `connection` events, not as an error.
    ///
    /// # Errors
    ///
    /// [`ConnectError::MissingCredential`] when no token is available, and
    /// [`ConnectError::InvalidUrl`] when the server URL is not http(s)/ws(s).
    /// In both cases nothing is opened or scheduled.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.is_running() {
            log::debug!("[transport] connect() ignored: already {}", self.status());
            return Ok(());
        }

        if self.credentials.credential().await.is_none() {
            log::warn!("[transport] No credential available, not connecting");
            return Err(ConnectError::MissingCredential);
        }

        if !(self.settings.url.starts_with("ws://") || self.settings.url.starts_with("wss://")) {
            return Err(ConnectError::InvalidUrl(self.settings.url.clone()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            settings: self.settings.clone(),
            credentials: Arc::clone(&self.credentials),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
            outbound: outbound_rx,
            settled: Some(settled_tx),
        };

        self.outbound = Some(outbound_tx);
        self.supervisor = Some(SupervisorHandle {
            cancel,
            task: tokio::spawn(supervisor.run()),
        });

        settled_rx.await.map_err(|_aborted| ConnectError::Aborted)
    }

    /// Close the socket, cancel any pending retry and go `Disconnected`.
    ///
    /// Idempotent. Waits up to [`CLOSE_TIMEOUT`] for the close frame before
    /// aborting the supervisor.
    pub async fn disconnect(&mut self) {
        self.outbound = None;

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.cancel.cancel();
            let mut task = supervisor.task;
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                log::warn!("[transport] Supervisor did not stop in {CLOSE_TIMEOUT:?}, aborting");
                task.abort();
            }
        }

        if self.status() != ConnectionStatus::Disconnected {
            self.shared
                .transition(ConnectionEvent::new(ConnectionStatus::Disconnected));
        }
    }

    /// Queue an outbound `{"event", "data"}` frame.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] unless the status is `Connected`. Nothing
    /// is queued for later.
    pub fn send(&self, topic: &str, data: Value) -> Result<(), SendError> {
        if self.status() != ConnectionStatus::Connected {
            return Err(SendError::NotConnected);
        }
        let Some(outbound) = &self.outbound else {
            return Err(SendError::NotConnected);
        };
        let frame = serde_json::json!({ "event": topic, "data": data });
        let text = serde_json::to_string(&frame).map_err(|e| SendError::Encode(e.to_string()))?;
        log::debug!("[transport] Queueing outbound {topic}");
        outbound
            .send(text)
            .map_err(|_closed| SendError::NotConnected)
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.cancel.cancel();
        }
    }
}

/// Result of one connected session.
enum SessionExit {
    /// Cancelled via `disconnect()` or drop.
    Shutdown,
    /// Socket lost; reconnect after backoff.
    Lost(String),
}

/// Owns the reconnect loop for one `connect()` call.
struct Supervisor {
    settings: Settings,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedReceiver<String>,
    settled: Option<oneshot::Sender<()>>,
}

impl Supervisor {
    /// Drop frames queued for a socket that has since been lost. Runs before
    /// the `Connected` transition, so nothing sent on the new socket is lost.
    fn purge_outbound(&mut self) {
        let mut purged = 0usize;
        while self.outbound.try_recv().is_ok() {
            purged += 1;
        }
        if purged > 0 {
            log::debug!("[transport] Dropped {purged} outbound frames queued for a lost socket");
        }
    }

    /// Wake the `connect()` caller once the first attempt has an outcome.
    fn settle(&mut self) {
        if let Some(settled) = self.settled.take() {
            let _ = settled.send(());
        }
    }

    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.shared.transition(ConnectionEvent {
                attempt,
                ..ConnectionEvent::new(ConnectionStatus::Connecting)
            });

            let Some(credential) = self.credentials.credential().await else {
                self.shared.transition(ConnectionEvent {
                    reason: Some("credential no longer available".to_string()),
                    attempt,
                    ..ConnectionEvent::new(ConnectionStatus::Error)
                });
                self.settle();
                return;
            };

            log::info!("[transport] Connecting to {}", self.settings.url);
            let bearer = credential.bearer();
            let handshake = tokio::time::timeout(
                self.settings.handshake_timeout,
                ws::connect(&self.settings.url, bearer.as_str()),
            );

            let outcome = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.settle();
                    return;
                }
                outcome = handshake => outcome,
            };

            let reason = match outcome {
                Ok(Ok((writer, reader))) => {
                    attempt = 0;
                    self.purge_outbound();
                    self.shared
                        .transition(ConnectionEvent::new(ConnectionStatus::Connected));
                    self.settle();
                    match self.run_session(writer, reader).await {
                        SessionExit::Shutdown => return,
                        SessionExit::Lost(reason) => reason,
                    }
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(_elapsed) => format!(
                    "handshake timed out after {:?}",
                    self.settings.handshake_timeout
                ),
            };

            attempt = attempt.saturating_add(1);
            let Some(delay) = self.settings.backoff.delay_for(attempt) else {
                self.shared.transition(ConnectionEvent {
                    reason: Some(reason),
                    attempt,
                    ..ConnectionEvent::new(ConnectionStatus::Error)
                });
                log::warn!("[transport] Giving up after {} attempts", attempt);
                self.settle();
                return;
            };

            self.shared.transition(ConnectionEvent {
                reason: Some(reason),
                attempt,
                retry_in_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
                ..ConnectionEvent::new(ConnectionStatus::Error)
            });
            self.settle();

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump one socket until it is lost or the supervisor is cancelled.
    async fn run_session(&mut self, mut writer: SocketWriter, mut reader: SocketReader) -> SessionExit {
        let interval = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    // Frames accepted by send() before disconnect still go out.
                    while let Ok(text) = self.outbound.try_recv() {
                        if let Err(e) = writer.send_text(&text).await {
                            log::debug!("[transport] Outbound frame lost on close: {e:#}");
                            break;
                        }
                    }
                    if let Err(e) = writer.close().await {
                        log::debug!("[transport] Close frame not sent: {e:#}");
                    }
                    return SessionExit::Shutdown;
                }
                message = reader.recv() => {
                    last_seen = Instant::now();
                    match message {
                        Some(Ok(Inbound::Text(text))) => {
                            log::debug!("[transport] Received frame ({} bytes)", text.len());
                            let _ = self.shared.dispatch.send(Dispatch::Frame(text));
                        }
                        Some(Ok(Inbound::Binary(len))) => {
                            log::warn!("[transport] Ignoring binary frame ({len} bytes)");
                        }
                        Some(Ok(Inbound::Ping(data))) => {
                            if let Err(e) = writer.send_pong(data).await {
                                return SessionExit::Lost(format!("{e:#}"));
                            }
                        }
                        Some(Ok(Inbound::Pong)) => {}
                        Some(Ok(Inbound::Closed { code, reason })) => {
                            let reason = if reason.is_empty() {
                                format!("server closed the socket ({code})")
                            } else {
                                format!("server closed the socket ({code}: {reason})")
                            };
                            return SessionExit::Lost(reason);
                        }
                        Some(Err(e)) => return SessionExit::Lost(format!("{e:#}")),
                        None => return SessionExit::Lost("socket stream ended".to_string()),
                    }
                }
                Some(text) = self.outbound.recv() => {
                    if let Err(e) = writer.send_text(&text).await {
                        return SessionExit::Lost(format!("{e:#}"));
                    }
                }
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= self.settings.stale_timeout {
                        return SessionExit::Lost(format!(
                            "no traffic for {:?}",
                            self.settings.stale_timeout
                        ));
                    }
                    if let Err(e) = writer.send_ping().await {
                        return SessionExit::Lost(format!("{e:#}"));
                    }
                }
            }
        }
    }
}
