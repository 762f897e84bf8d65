//! iotaudit-live - real-time event distribution for the IoT audit dashboard.
//!
//! One authenticated WebSocket carries every server-pushed event; this crate
//! keeps it alive and fans its frames out to independent listeners. Per-device
//! log tails run over separate HTTP streams, and a small toast queue surfaces
//! the events a user should notice.
//!
//! # Architecture
//!
//! - **Transport** - WebSocket lifecycle: connect, heartbeat, backoff retry
//! - **Multiplexer** - topic registry plus the dispatch queue it drains
//! - **Stream tailer** - cancellable per-resource log streams
//! - **Notifications** - self-expiring toasts and the event router feeding them
//! - **Bindings** - connection badge and live state for view code
//!
//! # Modules
//!
//! - [`transport`] - connection state machine and [`transport::Backoff`]
//! - [`multiplexer`] - [`Multiplexer`], the entry point for subscribers
//! - [`events`] - frame envelope, typed topics, listener registry
//! - [`stream`] - [`StreamTailer`] and [`stream::StreamHandle`]
//! - [`notifications`] - [`NotificationQueue`] and [`NotificationRouter`]
//! - [`config`] - configuration loading/saving

// Library modules
pub mod bindings;
pub mod events;
pub mod multiplexer;
pub mod notifications;
pub mod stream;
pub mod transport;
pub mod ws;

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;

// Re-export commonly used types
pub use bindings::{AuditProgressBoard, ConnectionIndicator, DeviceStatusBoard, LiveState};
pub use config::Config;
pub use credentials::{ChainedCredentials, Credential, CredentialProvider};
pub use error::{ConnectError, SendError, StreamError};
pub use events::{Frame, LiveEvent, Subscription, Topic};
pub use multiplexer::Multiplexer;
pub use notifications::{Notification, NotificationKind, NotificationQueue, NotificationRouter};
pub use stream::{StreamHandle, StreamTailer};
pub use transport::{ConnectionEvent, ConnectionStatus, TransportConnection};
