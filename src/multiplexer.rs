//! Event multiplexer: one socket, many independent topic listeners.
//!
//! The [`Multiplexer`] owns the [`TransportConnection`], the listener
//! registry and the receiving end of the dispatch queue. The transport's
//! read loop only enqueues; listeners run wherever the owner drains the
//! queue ([`Multiplexer::pump`], [`Multiplexer::dispatch_pending`] or
//! [`Multiplexer::run_until`]). Per-topic delivery order is therefore the
//! frame arrival order, and dispatch never overlaps a registry mutation.
//!
//! # Usage
//!
//! ```ignore
//! let mut mux = Multiplexer::new(&config, Arc::new(ChainedCredentials::standard()));
//! let _progress = mux.subscribe_to::<AuditProgress, _>(|p| println!("{}%", p.progress));
//! mux.connect().await?;
//! mux.run_until(tokio::signal::ctrl_c()).await?;
//! mux.disconnect().await;
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::{ConnectError, SendError};
use crate::events::registry::{self, SharedTopicRegistry, Subscription, TopicRegistry};
use crate::events::{preview, Frame, Topic, CONNECTION_TOPIC};
use crate::transport::{ConnectionStatus, Dispatch, TransportConnection};

/// Demultiplexes inbound frames by topic.
pub struct Multiplexer {
    registry: SharedTopicRegistry,
    transport: TransportConnection,
    dispatch_rx: mpsc::UnboundedReceiver<Dispatch>,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("registry", &*registry::lock(&self.registry))
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    /// Disconnected multiplexer with its own transport.
    pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (transport, dispatch_rx) = TransportConnection::new(config, credentials);
        Self {
            registry: Arc::new(Mutex::new(TopicRegistry::new())),
            transport,
            dispatch_rx,
        }
    }

    /// Register `callback` for `topic`.
    ///
    /// The returned [`Subscription`] is the disposer; dropping it removes
    /// the listener.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        registry::subscribe(&self.registry, topic, Arc::new(callback))
    }

    /// Register a typed listener for `T::NAME`.
    ///
    /// Payloads that do not decode as `T` are skipped for this listener with
    /// a warning; untyped listeners on the same topic still receive them.
    pub fn subscribe_to<T, F>(&self, callback: F) -> Subscription
    where
        T: Topic,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(T::NAME, move |data| match T::decode(data) {
            Ok(payload) => callback(payload),
            Err(e) => log::warn!("[multiplexer] Skipping '{}' payload: {e}", T::NAME),
        })
    }

    /// Parse a raw frame and deliver it to the listeners of its topic.
    ///
    /// Malformed frames are dropped with a warning, as are frames on the
    /// `connection` topic, which only the transport may emit. Returns how
    /// many listeners completed without panicking.
    pub fn publish_inbound(&self, text: &str) -> usize {
        match Frame::parse(text) {
            Ok(frame) if frame.event == CONNECTION_TOPIC => {
                log::warn!("[multiplexer] Ignoring server frame on reserved '{CONNECTION_TOPIC}' topic");
                0
            }
            Ok(frame) => self.dispatch(&frame.event, &frame.data),
            Err(e) => {
                log::warn!("[multiplexer] Dropping frame ({e}): {}", preview(text));
                0
            }
        }
    }

    /// Deliver a locally generated event through the same path as inbound
    /// frames.
    pub fn publish_local(&self, topic: &str, data: &Value) -> usize {
        self.dispatch(topic, data)
    }

    fn dispatch(&self, topic: &str, data: &Value) -> usize {
        let listeners = registry::lock(&self.registry).snapshot(topic);
        if listeners.is_empty() {
            log::trace!("[multiplexer] No listeners for '{topic}'");
            return 0;
        }

        let mut delivered = 0;
        for listener in listeners {
            if !listener.is_active() {
                continue;
            }
            let callback = listener.callback();
            match panic::catch_unwind(AssertUnwindSafe(|| callback(data))) {
                Ok(()) => delivered += 1,
                Err(payload) => log::error!(
                    "[multiplexer] Listener on '{topic}' panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }
        delivered
    }

    fn handle(&self, item: Dispatch) {
        match item {
            Dispatch::Frame(text) => {
                self.publish_inbound(&text);
            }
            Dispatch::Connection(event) => match serde_json::to_value(&event) {
                Ok(data) => {
                    self.dispatch(CONNECTION_TOPIC, &data);
                }
                Err(e) => log::error!("[multiplexer] Cannot encode connection event: {e}"),
            },
        }
    }

    /// Wait for one queued item and dispatch it.
    ///
    /// Returns `false` if the queue is closed.
    pub async fn pump(&mut self) -> bool {
        match self.dispatch_rx.recv().await {
            Some(item) => {
                self.handle(item);
                true
            }
            None => false,
        }
    }

    /// Dispatch everything already queued without waiting. Returns the
    /// number of items handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(item) = self.dispatch_rx.try_recv() {
            self.handle(item);
            handled += 1;
        }
        handled
    }

    /// Dispatch queued items until `shutdown` resolves, then return its
    /// output.
    pub async fn run_until<F: Future>(&mut self, shutdown: F) -> F::Output {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                output = &mut shutdown => return output,
                item = self.dispatch_rx.recv() => match item {
                    Some(item) => self.handle(item),
                    None => return (&mut shutdown).await,
                },
            }
        }
    }

    /// Connect the transport, then dispatch the resulting `connection`
    /// events.
    ///
    /// # Errors
    ///
    /// See [`TransportConnection::connect`].
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        let result = self.transport.connect().await;
        self.dispatch_pending();
        result
    }

    /// Disconnect the transport, then dispatch what is left in the queue.
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.dispatch_pending();
    }

    /// Send `{"event": topic, "data": data}` to the server.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] unless connected; nothing is queued.
    pub fn send(&self, topic: &str, data: Value) -> Result<(), SendError> {
        self.transport.send(topic, data)
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Receiver that observes every connection state change.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.transport.status_watch()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &TransportConnection {
        &self.transport
    }

    /// Number of listeners on `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        registry::lock(&self.registry).listener_count(topic)
    }

    /// Topics with at least one listener, sorted.
    pub fn topics(&self) -> Vec<String> {
        registry::lock(&self.registry).topics()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
