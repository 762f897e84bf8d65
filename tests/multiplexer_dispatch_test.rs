//! End-to-end dispatch: server frames into boards, toasts and raw listeners.

mod common;

use std::sync::{Arc, Mutex};

use common::{push, EventServer, WAIT};
use iotaudit_live::credentials::StaticCredentials;
use iotaudit_live::events::DeviceStatus;
use iotaudit_live::{
    AuditProgressBoard, ConnectionIndicator, ConnectionStatus, DeviceStatusBoard, Multiplexer,
    NotificationKind, NotificationQueue, NotificationRouter,
};
use serde_json::json;

#[tokio::test]
async fn test_live_frames_drive_boards_and_toasts() {
    let mut server = EventServer::start().await;
    let config = server.config();
    let mut mux = Multiplexer::new(&config, Arc::new(StaticCredentials::new("t")));

    let devices = DeviceStatusBoard::new(
        &mux,
        [DeviceStatus {
            device_id: "cam-1".into(),
            status: "online".into(),
            last_seen: None,
        }],
    );
    let audits = AuditProgressBoard::new(&mux);
    let queue = NotificationQueue::new(config.notification_duration());
    let _router = NotificationRouter::attach(&mux, &queue);
    let indicator = ConnectionIndicator::new(&mux);

    mux.connect().await.unwrap();
    assert_eq!(indicator.status(), ConnectionStatus::Connected);
    assert_eq!(indicator.label(), "Live");

    let mut socket = server.accept().await;
    push(&mut socket, "device:status", json!({"deviceId": "cam-1", "status": "offline"})).await;
    push(&mut socket, "audit:progress", json!({"auditId": "a1", "progress": 75})).await;
    push(
        &mut socket,
        "vulnerability:detected",
        json!({"severity": "high", "title": "Open telnet", "deviceId": "cam-1"}),
    )
    .await;
    push(&mut socket, "audit:completed", json!({"auditId": "a1", "findings": 1})).await;

    tokio::time::timeout(WAIT, async {
        while queue.len() < 2 {
            assert!(mux.pump().await);
        }
    })
    .await
    .expect("frames not dispatched in time");

    assert_eq!(devices.status("cam-1").as_deref(), Some("offline"));
    assert_eq!(audits.progress("a1"), Some(75.0));
    let toasts: Vec<_> = queue.snapshot().into_iter().map(|n| (n.kind, n.message)).collect();
    assert_eq!(
        toasts,
        vec![
            (NotificationKind::Error, "high vulnerability on cam-1: Open telnet".to_string()),
            (NotificationKind::Success, "Audit a1 completed with 1 findings".to_string()),
        ]
    );

    mux.disconnect().await;
    assert_eq!(indicator.label(), "Offline");
}

#[tokio::test]
async fn test_run_until_dispatches_until_shutdown() {
    let mut server = EventServer::start().await;
    let mut mux = Multiplexer::new(&server.config(), Arc::new(StaticCredentials::new("t")));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = mux.subscribe("report:generated", move |data| {
        sink.lock().unwrap().push(data["reportId"].as_str().unwrap_or_default().to_string());
    });
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<&'static str>();

    mux.connect().await.unwrap();
    let mut socket = server.accept().await;

    let watcher = Arc::clone(&seen);
    let driver = tokio::spawn(async move {
        push(&mut socket, "report:generated", json!({"reportId": "r1"})).await;
        push(&mut socket, "report:generated", json!({"reportId": "r2"})).await;
        while watcher.lock().unwrap().len() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        stop_tx.send("done").unwrap();
        socket
    });

    let output = tokio::time::timeout(WAIT, mux.run_until(stop_rx)).await.unwrap();
    assert_eq!(output, Ok("done"));
    assert_eq!(*seen.lock().unwrap(), vec!["r1".to_string(), "r2".to_string()]);

    let _socket = driver.await.unwrap();
    mux.disconnect().await;
}

#[tokio::test]
async fn test_independent_listeners_share_one_socket() {
    let mut server = EventServer::start().await;
    let mut mux = Multiplexer::new(&server.config(), Arc::new(StaticCredentials::new("t")));

    let a = Arc::new(Mutex::new(0));
    let b = Arc::new(Mutex::new(0));
    let (sa, sb) = (Arc::clone(&a), Arc::clone(&b));
    let first = mux.subscribe("device:status", move |_| *sa.lock().unwrap() += 1);
    let _second = mux.subscribe("device:status", move |_| *sb.lock().unwrap() += 1);

    mux.connect().await.unwrap();
    let mut socket = server.accept().await;

    push(&mut socket, "device:status", json!({"deviceId": "d", "status": "online"})).await;
    tokio::time::timeout(WAIT, async {
        while *b.lock().unwrap() < 1 {
            assert!(mux.pump().await);
        }
    })
    .await
    .unwrap();

    first.dispose();
    push(&mut socket, "device:status", json!({"deviceId": "d", "status": "offline"})).await;
    tokio::time::timeout(WAIT, async {
        while *b.lock().unwrap() < 2 {
            assert!(mux.pump().await);
        }
    })
    .await
    .unwrap();

    assert_eq!(*a.lock().unwrap(), 1);
    assert_eq!(*b.lock().unwrap(), 2);
    assert_eq!(server.auth_headers.lock().unwrap().len(), 1);

    mux.disconnect().await;
}
