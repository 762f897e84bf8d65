//! Event socket transport.
//!
//! One [`TransportConnection`] owns one WebSocket to the server event
//! endpoint. A supervisor task runs the connect/reconnect loop and is the
//! only writer of [`ConnectionStatus`].
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                          │  ▲                         │
//!      │                    fail  │  │ backoff elapsed         │ socket lost
//!      │                          ▼  │                         ▼
//!      └────────disconnect()───── Error ◀──────────────────────┘
//! ```
//!
//! The transport never calls subscribers. Inbound frames and connection
//! events are pushed onto a [`Dispatch`] queue that
//! [`crate::multiplexer::Multiplexer`] drains on its owner's task.

mod backoff;
mod connection;

pub use backoff::Backoff;
pub use connection::TransportConnection;

use serde::{Deserialize, Serialize};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No socket and no pending retry.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open and authenticated.
    Connected,
    /// Last attempt failed or the socket was lost. A retry may be pending.
    Error,
}

impl ConnectionStatus {
    /// Lowercase name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of the `connection` topic, emitted on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    /// New state.
    pub status: ConnectionStatus,
    /// Why the transition happened, for `Error` and unrequested closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Consecutive failed attempts so far (0 once connected).
    #[serde(default)]
    pub attempt: u32,
    /// Delay before the next automatic attempt. Absent on a terminal error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

impl ConnectionEvent {
    /// Event with just a status.
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            reason: None,
            attempt: 0,
            retry_in_ms: None,
        }
    }

    /// An `Error` with no retry scheduled.
    pub fn is_terminal_error(&self) -> bool {
        self.status == ConnectionStatus::Error && self.retry_in_ms.is_none()
    }
}

/// Item on the dispatch queue between the transport and the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Raw inbound text frame.
    Frame(String),
    /// State transition.
    Connection(ConnectionEvent),
}
