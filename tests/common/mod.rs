//! Shared helpers for integration tests: a local WebSocket event server.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use iotaudit_live::Config;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Server side of one accepted socket.
pub type ServerSocket = WebSocketStream<TcpStream>;

/// Local event server accepting any number of sockets on `/ws`.
pub struct EventServer {
    pub port: u16,
    /// `Authorization` header of each upgrade request, in accept order.
    pub auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    /// Path of each upgrade request, in accept order.
    pub paths: Arc<Mutex<Vec<String>>>,
    sockets: mpsc::UnboundedReceiver<ServerSocket>,
}

impl EventServer {
    /// Bind to an ephemeral port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let auth_headers = Arc::new(Mutex::new(Vec::new()));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let (tx, sockets) = mpsc::unbounded_channel();

        let auth = Arc::clone(&auth_headers);
        let seen_paths = Arc::clone(&paths);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let auth = Arc::clone(&auth);
                let seen_paths = Arc::clone(&seen_paths);
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let header = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    auth.lock().unwrap().push(header);
                    seen_paths.lock().unwrap().push(req.uri().path().to_string());
                    Ok(resp)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            port,
            auth_headers,
            paths,
            sockets,
        }
    }

    /// Config pointing at this server with fast retries and no heartbeat
    /// traffic during a test.
    pub fn config(&self) -> Config {
        Config {
            server_url: format!("http://127.0.0.1:{}", self.port),
            reconnect_base_ms: 20,
            reconnect_max_ms: 100,
            reconnect_attempts: 5,
            handshake_timeout_ms: 2_000,
            heartbeat_interval_ms: 60_000,
            stale_timeout_ms: 120_000,
            ..Config::default()
        }
    }

    /// Next accepted socket.
    pub async fn accept(&mut self) -> ServerSocket {
        tokio::time::timeout(WAIT, self.sockets.recv())
            .await
            .expect("no client connected in time")
            .expect("server task stopped")
    }
}

/// Send `{"event", "data"}` from the server side.
pub async fn push(socket: &mut ServerSocket, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    socket.send(Message::text(frame.to_string())).await.unwrap();
}

/// Next text frame received by the server, parsed as JSON.
pub async fn next_json(socket: &mut ServerSocket) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("no frame in time")
            .expect("socket ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Whether the client closed the socket (close frame or end of stream).
pub async fn closed_by_client(socket: &mut ServerSocket) -> bool {
    loop {
        match tokio::time::timeout(WAIT, socket.next()).await {
            Ok(Some(Ok(Message::Close(_)) | Err(_)) | None) => return true,
            Ok(Some(Ok(_))) => {}
            Err(_) => return false,
        }
    }
}
