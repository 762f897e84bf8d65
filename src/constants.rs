//! Application-wide constants for iotaudit-live.
//!
//! Centralizes defaults for the transport, stream tailer and notification
//! queue. [`crate::config::Config`] starts from these values and lets the
//! config file or environment override them.
//!
//! # Categories
//!
//! - **Reconnection**: backoff base, cap and attempt budget
//! - **Timeouts**: handshake, heartbeat and shutdown bounds
//! - **Streams**: line size limit
//! - **Notifications**: toast display duration
//! - **Endpoints**: default server URL and paths

use std::time::Duration;

// ============================================================================
// Reconnection
// ============================================================================

/// Delay before the first reconnection attempt.
///
/// Each further attempt doubles the delay until [`RECONNECT_MAX_DELAY`].
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for a single reconnection delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Number of automatic reconnection attempts before the connection gives up
/// and reports a terminal error.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Timeouts
// ============================================================================

/// Time allowed for TCP connect plus WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between client pings while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// A connected socket with no inbound traffic for this long is treated as lost.
pub const STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `disconnect()` waits for the close frame before aborting the
/// supervisor task.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Streams
// ============================================================================

/// Longest accepted stream line. Longer lines are skipped.
pub const STREAM_MAX_LINE_BYTES: usize = 1024 * 1024;

// ============================================================================
// Notifications
// ============================================================================

/// How long a toast stays in the queue before it is removed automatically.
pub const NOTIFICATION_DISPLAY_DURATION: Duration = Duration::from_millis(4000);

// ============================================================================
// Endpoints
// ============================================================================

/// Default dashboard server.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Path of the multiplexed event socket, appended to the server URL.
pub const DEFAULT_EVENTS_PATH: &str = "/ws";

/// Path template of the per-resource log stream. `{resource}` is replaced by
/// the percent-encoded resource id.
pub const DEFAULT_STREAM_PATH: &str = "/api/devices/{resource}/logs/stream";

/// Placeholder segment in [`DEFAULT_STREAM_PATH`].
pub const RESOURCE_PLACEHOLDER: &str = "{resource}";

/// Keychain service name used by [`crate::credentials::KeyringCredentials`].
pub const KEYRING_SERVICE: &str = "iotaudit";

/// Keychain account holding the dashboard API token.
pub const KEYRING_ACCOUNT: &str = "api_token";
