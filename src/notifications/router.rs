//! Turns selected live events into toasts.
//!
//! | Topic                    | Toast                                        |
//! |--------------------------|----------------------------------------------|
//! | `notification`           | kind from the payload (default `info`)       |
//! | `vulnerability:detected` | `error` if critical/high, else `warning`     |
//! | `audit:completed`        | `success`, or `error` if the audit failed    |
//! | `report:generated`       | `success`                                    |
//! | `connection`             | `error` on a terminal error only             |
//!
//! Transient connection faults are retried silently and never toasted.

use super::{NotificationKind, NotificationQueue};
use crate::events::{
    AuditCompleted, ReportGenerated, ServerNotification, Subscription, VulnerabilityDetected,
};
use crate::multiplexer::Multiplexer;
use crate::transport::ConnectionEvent;

/// Keeps the router's listeners registered; dropping it detaches them.
#[derive(Debug)]
pub struct NotificationRouter {
    subscriptions: Vec<Subscription>,
}

impl NotificationRouter {
    /// Start routing events from `multiplexer` into `queue`.
    pub fn attach(multiplexer: &Multiplexer, queue: &NotificationQueue) -> Self {
        let subscriptions = vec![
            {
                let queue = queue.clone();
                multiplexer.subscribe_to::<ServerNotification, _>(move |toast| {
                    queue.push(toast.kind, toast.message);
                })
            },
            {
                let queue = queue.clone();
                multiplexer.subscribe_to::<VulnerabilityDetected, _>(move |finding| {
                    let (kind, message) = vulnerability_toast(&finding);
                    queue.push(kind, message);
                })
            },
            {
                let queue = queue.clone();
                multiplexer.subscribe_to::<AuditCompleted, _>(move |audit| {
                    let (kind, message) = audit_toast(&audit);
                    queue.push(kind, message);
                })
            },
            {
                let queue = queue.clone();
                multiplexer.subscribe_to::<ReportGenerated, _>(move |report| {
                    queue.push(
                        NotificationKind::Success,
                        format!("Report {} is ready", report.report_id),
                    );
                })
            },
            {
                let queue = queue.clone();
                multiplexer.subscribe_to::<ConnectionEvent, _>(move |event| {
                    if event.is_terminal_error() {
                        let reason = event.reason.as_deref().unwrap_or("unknown error");
                        queue.push(
                            NotificationKind::Error,
                            format!("Live updates stopped: {reason}"),
                        );
                    }
                })
            },
        ];

        log::debug!("[notifications] Router attached ({} topics)", subscriptions.len());
        Self { subscriptions }
    }

    /// Number of topics routed.
    pub fn topic_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Stop routing.
    pub fn detach(self) {
        for subscription in self.subscriptions {
            subscription.dispose();
        }
    }
}

fn vulnerability_toast(finding: &VulnerabilityDetected) -> (NotificationKind, String) {
    let kind = if finding.severity.is_severe() {
        NotificationKind::Error
    } else {
        NotificationKind::Warning
    };
    let message = match &finding.device_id {
        Some(device) => format!(
            "{} vulnerability on {device}: {}",
            finding.severity.as_str(),
            finding.title
        ),
        None => format!("{} vulnerability: {}", finding.severity.as_str(), finding.title),
    };
    (kind, message)
}

fn audit_toast(audit: &AuditCompleted) -> (NotificationKind, String) {
    if audit.is_failed() {
        (NotificationKind::Error, format!("Audit {} failed", audit.audit_id))
    } else {
        (
            NotificationKind::Success,
            format!("Audit {} completed with {} findings", audit.audit_id, audit.findings),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::StaticCredentials;
    use crate::events::CONNECTION_TOPIC;
    use crate::transport::ConnectionStatus;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Multiplexer, NotificationQueue, NotificationRouter) {
        let mux = Multiplexer::new(&Config::default(), Arc::new(StaticCredentials::none()));
        let queue = NotificationQueue::new(Duration::from_secs(4));
        let router = NotificationRouter::attach(&mux, &queue);
        (mux, queue, router)
    }

    fn kinds_and_messages(queue: &NotificationQueue) -> Vec<(NotificationKind, String)> {
        queue
            .snapshot()
            .into_iter()
            .map(|n| (n.kind, n.message))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_notification_becomes_toast() {
        let (mux, queue, _router) = setup();
        mux.publish_inbound(r#"{"event":"notification","data":{"type":"warning","message":"Disk almost full"}}"#);
        mux.publish_inbound(r#"{"event":"notification","data":{"message":"Welcome back"}}"#);

        assert_eq!(
            kinds_and_messages(&queue),
            vec![
                (NotificationKind::Warning, "Disk almost full".to_string()),
                (NotificationKind::Info, "Welcome back".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_vulnerability_severity_maps_to_kind() {
        let (mux, queue, _router) = setup();
        mux.publish_inbound(
            r#"{"event":"vulnerability:detected","data":{"severity":"critical","title":"Default password","deviceId":"cam-1"}}"#,
        );
        mux.publish_inbound(
            r#"{"event":"vulnerability:detected","data":{"severity":"low","title":"Verbose banner"}}"#,
        );

        assert_eq!(
            kinds_and_messages(&queue),
            vec![
                (
                    NotificationKind::Error,
                    "critical vulnerability on cam-1: Default password".to_string()
                ),
                (NotificationKind::Warning, "low vulnerability: Verbose banner".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_and_report_toasts() {
        let (mux, queue, _router) = setup();
        mux.publish_inbound(r#"{"event":"audit:completed","data":{"auditId":"a1","findings":3}}"#);
        mux.publish_inbound(r#"{"event":"audit:completed","data":{"auditId":"a2","status":"failed"}}"#);
        mux.publish_inbound(r#"{"event":"report:generated","data":{"reportId":"r9"}}"#);

        assert_eq!(
            kinds_and_messages(&queue),
            vec![
                (NotificationKind::Success, "Audit a1 completed with 3 findings".to_string()),
                (NotificationKind::Error, "Audit a2 failed".to_string()),
                (NotificationKind::Success, "Report r9 is ready".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_terminal_connection_errors_are_toasted() {
        let (mux, queue, _router) = setup();
        let transient = ConnectionEvent {
            reason: Some("refused".into()),
            attempt: 1,
            retry_in_ms: Some(1000),
            ..ConnectionEvent::new(ConnectionStatus::Error)
        };
        let terminal = ConnectionEvent {
            retry_in_ms: None,
            attempt: 6,
            ..transient.clone()
        };

        mux.publish_local(CONNECTION_TOPIC, &serde_json::to_value(&transient).unwrap());
        assert!(queue.is_empty());

        mux.publish_local(CONNECTION_TOPIC, &serde_json::to_value(&terminal).unwrap());
        assert_eq!(
            kinds_and_messages(&queue),
            vec![(NotificationKind::Error, "Live updates stopped: refused".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_routing() {
        let (mux, queue, router) = setup();
        assert_eq!(router.topic_count(), 5);
        router.detach();
        assert!(mux.topics().is_empty());

        mux.publish_inbound(r#"{"event":"report:generated","data":{"reportId":"r1"}}"#);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_routed_toasts_expire() {
        let (mux, queue, _router) = setup();
        mux.publish_inbound(r#"{"event":"report:generated","data":{"reportId":"r1"}}"#);
        assert_eq!(queue.len(), 1);
        tokio::time::sleep(Duration::from_millis(4001)).await;
        assert!(queue.is_empty());
    }
}
