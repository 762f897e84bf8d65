//! Integration tests for resource streams against a mock HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use iotaudit_live::credentials::StaticCredentials;
use iotaudit_live::{Config, StreamError, StreamTailer};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn tailer(server: &MockServer, token: &str) -> StreamTailer {
    let config = Config {
        server_url: server.uri(),
        ..Config::default()
    };
    let credentials = if token.is_empty() {
        StaticCredentials::none()
    } else {
        StaticCredentials::new(token)
    };
    StreamTailer::new(&config, Arc::new(credentials))
}

fn collector() -> (Arc<Mutex<Vec<Value>>>, impl FnMut(Value) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event| sink.lock().unwrap().push(event))
}

#[tokio::test]
async fn test_stream_delivers_events_in_server_order() {
    let server = MockServer::start().await;
    let body = concat!(
        ": keep-alive\n",
        "data: {\"line\":1,\"msg\":\"boot\"}\n",
        "\n",
        "event: log\n",
        "data: {\"line\":2,\"msg\":\"telnet open\"}\n",
        "data: {broken\n",
        "{\"line\":3,\"msg\":\"plain json line\"}\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/devices/cam-1/logs/stream"))
        .and(header("authorization", "Bearer stream-token"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (seen, on_event) = collector();
    let handle = tailer(&server, "stream-token").open("cam-1", on_event).await.unwrap();
    assert_eq!(handle.resource_id(), "cam-1");

    tokio::time::timeout(WAIT, handle.closed()).await.unwrap();
    assert!(!handle.is_active());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            json!({"line": 1, "msg": "boot"}),
            json!({"line": 2, "msg": "telnet open"}),
            json!({"line": 3, "msg": "plain json line"}),
        ]
    );
}

#[tokio::test]
async fn test_resource_id_is_one_encoded_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices/lock%2F9/logs/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{\"ok\":true}\n", "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (seen, on_event) = collector();
    let handle = tailer(&server, "t").open("lock/9", on_event).await.unwrap();
    tokio::time::timeout(WAIT, handle.closed()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![json!({"ok": true})]);
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = tailer(&server, "t").open("ghost", |_| {}).await;
    match result {
        Err(StreamError::Status(status)) => assert_eq!(status, reqwest::StatusCode::NOT_FOUND),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_credential_sends_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = tailer(&server, "").open("cam-1", |_| {}).await;
    assert!(matches!(result, Err(StreamError::MissingCredential)));
}
