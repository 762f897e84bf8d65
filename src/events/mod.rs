//! Event frames, topic names and the listener registry.
//!
//! Every frame on the event socket is a JSON object
//! `{"event": "<topic>", "data": <any>}`. The topic string selects the
//! listener list; `data` is handed to listeners as an opaque
//! [`serde_json::Value`], or decoded into a typed payload via [`Topic`].
//!
//! # Reference topics
//!
//! - `connection` - transport state transitions (local only)
//! - `audit:started`, `audit:progress`, `audit:completed`
//! - `vulnerability:detected`
//! - `device:status`
//! - `notification`
//! - `report:generated`

pub mod registry;
pub mod topics;

pub use registry::{Listener, ListenerId, SharedTopicRegistry, Subscription, TopicRegistry};
pub use topics::{
    AuditCompleted, AuditProgress, AuditStarted, DeviceStatus, LiveEvent, ReportGenerated,
    ServerNotification, Severity, Topic, VulnerabilityDetected,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic carrying [`crate::transport::ConnectionEvent`] payloads.
pub const CONNECTION_TOPIC: &str = "connection";
/// An audit run began.
pub const AUDIT_STARTED_TOPIC: &str = "audit:started";
/// Periodic audit progress.
pub const AUDIT_PROGRESS_TOPIC: &str = "audit:progress";
/// An audit run finished.
pub const AUDIT_COMPLETED_TOPIC: &str = "audit:completed";
/// A finding was recorded.
pub const VULNERABILITY_DETECTED_TOPIC: &str = "vulnerability:detected";
/// A device changed state.
pub const DEVICE_STATUS_TOPIC: &str = "device:status";
/// Server-pushed toast.
pub const NOTIFICATION_TOPIC: &str = "notification";
/// A report is ready.
pub const REPORT_GENERATED_TOPIC: &str = "report:generated";

/// A multiplexed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Topic name.
    pub event: String,
    /// Opaque payload; `null` when the server omits it.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the text is not JSON, is not an object,
    /// or has no string `event` field.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(FrameError::NotAnObject);
        };
        let event = match object.remove("event") {
            Some(Value::String(event)) if !event.is_empty() => event,
            _ => return Err(FrameError::MissingEvent),
        };
        let data = object.remove("data").unwrap_or(Value::Null);
        Ok(Self { event, data })
    }
}

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not valid JSON.
    InvalidJson(String),
    /// Valid JSON but not an object.
    NotAnObject,
    /// No non-empty string `event` field.
    MissingEvent,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "invalid JSON: {msg}"),
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
            Self::MissingEvent => write!(f, "frame has no event name"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Truncate raw frame text for log lines.
pub(crate) fn preview(text: &str) -> &str {
    let mut end = text.len().min(100);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
