//! Typed payloads for the reference topic set.
//!
//! Each payload type implements [`Topic`], binding it to its wire name so
//! `multiplexer.subscribe_to::<DeviceStatus, _>(..)` needs no string literal.
//! Payload fields are camelCase on the wire. Unknown fields are ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Frame, AUDIT_COMPLETED_TOPIC, AUDIT_PROGRESS_TOPIC, AUDIT_STARTED_TOPIC, CONNECTION_TOPIC,
    DEVICE_STATUS_TOPIC, NOTIFICATION_TOPIC, REPORT_GENERATED_TOPIC, VULNERABILITY_DETECTED_TOPIC,
};
use crate::notifications::NotificationKind;
use crate::transport::ConnectionEvent;

/// A payload type bound to one topic name.
pub trait Topic: DeserializeOwned + Send + 'static {
    /// Wire name of the topic.
    const NAME: &'static str;

    /// Decode an opaque payload.
    fn decode(data: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(data)
    }
}

impl Topic for ConnectionEvent {
    const NAME: &'static str = CONNECTION_TOPIC;
}

/// `audit:started`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStarted {
    /// Audit run id.
    pub audit_id: String,
    /// Device under audit.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Audit profile name.
    #[serde(default)]
    pub name: Option<String>,
}

impl Topic for AuditStarted {
    const NAME: &'static str = AUDIT_STARTED_TOPIC;
}

/// `audit:progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditProgress {
    /// Audit run id.
    pub audit_id: String,
    /// Percent complete, 0 to 100.
    pub progress: f64,
    /// Current check or phase.
    #[serde(default)]
    pub stage: Option<String>,
}

impl Topic for AuditProgress {
    const NAME: &'static str = AUDIT_PROGRESS_TOPIC;
}

/// `audit:completed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCompleted {
    /// Audit run id.
    pub audit_id: String,
    /// Final status, e.g. `passed`, `failed`, `completed`.
    #[serde(default)]
    pub status: Option<String>,
    /// Number of findings.
    #[serde(default)]
    pub findings: u32,
}

impl AuditCompleted {
    /// Whether the audit ended in failure.
    pub fn is_failed(&self) -> bool {
        self.status.as_deref().is_some_and(|status| {
            status.eq_ignore_ascii_case("failed") || status.eq_ignore_ascii_case("error")
        })
    }
}

impl Topic for AuditCompleted {
    const NAME: &'static str = AUDIT_COMPLETED_TOPIC;
}

/// Vulnerability severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Actively exploitable, immediate action.
    Critical,
    /// Serious.
    High,
    /// Moderate.
    Medium,
    /// Minor.
    Low,
    /// Informational finding.
    Info,
    /// Any severity this client does not know.
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Critical or high.
    pub fn is_severe(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
            Self::Unknown => "unknown",
        }
    }
}

/// `vulnerability:detected`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityDetected {
    /// Finding id.
    #[serde(default)]
    pub id: Option<String>,
    /// Affected device.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Audit that found it.
    #[serde(default)]
    pub audit_id: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Short description.
    pub title: String,
}

impl Topic for VulnerabilityDetected {
    const NAME: &'static str = VULNERABILITY_DETECTED_TOPIC;
}

/// `device:status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Device id.
    pub device_id: String,
    /// Status label, e.g. `online`, `offline`, `scanning`.
    pub status: String,
    /// Server timestamp of the last heartbeat.
    #[serde(default)]
    pub last_seen: Option<String>,
}

impl Topic for DeviceStatus {
    const NAME: &'static str = DEVICE_STATUS_TOPIC;
}

/// `notification`: a server-pushed toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNotification {
    /// Toast kind; `info` when absent.
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: NotificationKind,
    /// Text to show.
    pub message: String,
}

impl Topic for ServerNotification {
    const NAME: &'static str = NOTIFICATION_TOPIC;
}

/// `report:generated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGenerated {
    /// Report id.
    pub report_id: String,
    /// Audit the report covers.
    #[serde(default)]
    pub audit_id: Option<String>,
    /// Download location.
    #[serde(default)]
    pub url: Option<String>,
}

impl Topic for ReportGenerated {
    const NAME: &'static str = REPORT_GENERATED_TOPIC;
}

/// Any frame, decoded by topic name.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// `connection`
    Connection(ConnectionEvent),
    /// `audit:started`
    AuditStarted(AuditStarted),
    /// `audit:progress`
    AuditProgress(AuditProgress),
    /// `audit:completed`
    AuditCompleted(AuditCompleted),
    /// `vulnerability:detected`
    VulnerabilityDetected(VulnerabilityDetected),
    /// `device:status`
    DeviceStatus(DeviceStatus),
    /// `notification`
    Notification(ServerNotification),
    /// `report:generated`
    ReportGenerated(ReportGenerated),
    /// A topic outside the reference set.
    Other {
        /// Topic name.
        event: String,
        /// Raw payload.
        data: Value,
    },
}

impl LiveEvent {
    /// Decode a frame by its topic name.
    ///
    /// # Errors
    ///
    /// Fails when a reference topic carries a payload of the wrong shape.
    pub fn decode(frame: &Frame) -> Result<Self, serde_json::Error> {
        let data = &frame.data;
        Ok(match frame.event.as_str() {
            CONNECTION_TOPIC => Self::Connection(ConnectionEvent::decode(data)?),
            AUDIT_STARTED_TOPIC => Self::AuditStarted(AuditStarted::decode(data)?),
            AUDIT_PROGRESS_TOPIC => Self::AuditProgress(AuditProgress::decode(data)?),
            AUDIT_COMPLETED_TOPIC => Self::AuditCompleted(AuditCompleted::decode(data)?),
            VULNERABILITY_DETECTED_TOPIC => {
                Self::VulnerabilityDetected(VulnerabilityDetected::decode(data)?)
            }
            DEVICE_STATUS_TOPIC => Self::DeviceStatus(DeviceStatus::decode(data)?),
            NOTIFICATION_TOPIC => Self::Notification(ServerNotification::decode(data)?),
            REPORT_GENERATED_TOPIC => Self::ReportGenerated(ReportGenerated::decode(data)?),
            other => Self::Other {
                event: other.to_string(),
                data: data.clone(),
            },
        })
    }

    /// Topic name of this event.
    pub fn topic(&self) -> &str {
        match self {
            Self::Connection(_) => ConnectionEvent::NAME,
            Self::AuditStarted(_) => AuditStarted::NAME,
            Self::AuditProgress(_) => AuditProgress::NAME,
            Self::AuditCompleted(_) => AuditCompleted::NAME,
            Self::VulnerabilityDetected(_) => VulnerabilityDetected::NAME,
            Self::DeviceStatus(_) => DeviceStatus::NAME,
            Self::Notification(_) => ServerNotification::NAME,
            Self::ReportGenerated(_) => ReportGenerated::NAME,
            Self::Other { event, .. } => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConnectionStatus;
    use serde_json::json;

    #[test]
    fn test_decode_device_status() {
        let frame = Frame::new(
            "device:status",
            json!({"deviceId": "cam-7", "status": "offline", "extra": true}),
        );
        assert_eq!(
            LiveEvent::decode(&frame).unwrap(),
            LiveEvent::DeviceStatus(DeviceStatus {
                device_id: "cam-7".into(),
                status: "offline".into(),
                last_seen: None,
            })
        );
    }

    #[test]
    fn test_unknown_severity_is_tolerated() {
        let finding = VulnerabilityDetected::decode(&json!({
            "severity": "catastrophic",
            "title": "Telnet open"
        }))
        .unwrap();
        assert_eq!(finding.severity, Severity::Unknown);
        assert!(!finding.severity.is_severe());
        assert!(Severity::Critical.is_severe());
        assert!(Severity::High.is_severe());
    }

    #[test]
    fn test_notification_kind_defaults_to_info() {
        let toast = ServerNotification::decode(&json!({"message": "hi"})).unwrap();
        assert_eq!(toast.kind, NotificationKind::Info);

        let toast = ServerNotification::decode(&json!({"type": "warning", "message": "disk"})).unwrap();
        assert_eq!(toast.kind, NotificationKind::Warning);
    }

    #[test]
    fn test_audit_completed_failure_detection() {
        let done = AuditCompleted::decode(&json!({"auditId": "a1", "status": "FAILED"})).unwrap();
        assert!(done.is_failed());
        let done = AuditCompleted::decode(&json!({"auditId": "a1", "status": "passed"})).unwrap();
        assert!(!done.is_failed());
        let done = AuditCompleted::decode(&json!({"auditId": "a1"})).unwrap();
        assert!(!done.is_failed());
    }

    #[test]
    fn test_connection_topic_decodes_transport_event() {
        let frame = Frame::new("connection", json!({"status": "connected", "attempt": 0}));
        let LiveEvent::Connection(event) = LiveEvent::decode(&frame).unwrap() else {
            panic!("expected connection event");
        };
        assert_eq!(event.status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_other_topics_pass_through() {
        let frame = Frame::new("firmware:uploaded", json!({"size": 12}));
        let event = LiveEvent::decode(&frame).unwrap();
        assert_eq!(event.topic(), "firmware:uploaded");
        assert!(matches!(event, LiveEvent::Other { .. }));
    }

    #[test]
    fn test_wrong_shape_is_an_error() {
        let frame = Frame::new("audit:progress", json!({"auditId": "a1"}));
        assert!(LiveEvent::decode(&frame).is_err());
    }
}
