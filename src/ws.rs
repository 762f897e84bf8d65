//! Event socket plumbing over `tokio-tungstenite`.
//!
//! [`connect`] performs the bearer-authenticated handshake against the
//! events endpoint and splits the socket into a [`SocketWriter`] and a
//! [`SocketReader`], so the transport session can read and write from one
//! `tokio::select!` loop.

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// What the server sent, as far as the transport cares.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame; candidate event envelope.
    Text(String),
    /// A binary frame of this many bytes. The event protocol never uses them.
    Binary(usize),
    /// Keepalive ping; answered with a pong carrying the same payload.
    Ping(Vec<u8>),
    /// Answer to one of our pings.
    Pong,
    /// Close frame. `code` is 1005 when the server gave none.
    Closed { code: u16, reason: String },
}

/// Sending half of the event socket.
#[derive(Debug)]
pub struct SocketWriter {
    sink: SplitSink<Socket, Message>,
}

impl SocketWriter {
    /// Send one serialized event envelope.
    ///
    /// # Errors
    ///
    /// Fails once the socket is closed or broken.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::text(text))
            .await
            .context("event socket write failed")
    }

    /// Heartbeat ping.
    ///
    /// # Errors
    ///
    /// Fails once the socket is closed or broken.
    pub async fn send_ping(&mut self) -> Result<()> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .context("event socket ping failed")
    }

    /// # Errors
    ///
    /// Fails once the socket is closed or broken.
    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Pong(payload))
            .await
            .context("event socket pong failed")
    }

    /// Send a close frame and flush.
    ///
    /// # Errors
    ///
    /// Fails if the close frame cannot be written.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("event socket close failed")
    }
}

/// Receiving half of the event socket.
#[derive(Debug)]
pub struct SocketReader {
    stream: SplitStream<Socket>,
}

impl SocketReader {
    /// Next message from the server; `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("event socket read failed: {e}"))),
            };
            let inbound = match message {
                Message::Text(text) => Inbound::Text(text.to_string()),
                Message::Binary(data) => Inbound::Binary(data.len()),
                Message::Ping(payload) => Inbound::Ping(payload.to_vec()),
                Message::Pong(_) => Inbound::Pong,
                Message::Close(frame) => match frame {
                    Some(frame) => Inbound::Closed {
                        code: frame.code.into(),
                        reason: frame.reason.to_string(),
                    },
                    None => Inbound::Closed {
                        code: 1005,
                        reason: String::new(),
                    },
                },
                Message::Frame(_) => continue,
            };
            return Some(Ok(inbound));
        }
    }
}

/// Open the event socket at `url`, presenting `bearer` as the
/// `Authorization` header.
///
/// # Errors
///
/// Fails for an unparseable URL, a bearer that is not a valid header value,
/// or a rejected handshake (a 401 from the server included).
pub async fn connect(url: &str, bearer: &str) -> Result<(SocketWriter, SocketReader)> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid event socket URL: {url}"))?;
    let authorization =
        HeaderValue::from_str(bearer).context("credential is not a valid header value")?;
    request.headers_mut().insert(header::AUTHORIZATION, authorization);

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("event socket handshake with {url} failed"))?;
    let (sink, stream) = socket.split();
    Ok((SocketWriter { sink }, SocketReader { stream }))
}

/// Rewrite an `http(s)://` server URL to `ws(s)://`. Other schemes pass
/// through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Socket URL for `events_path` on `server_url`.
#[must_use]
pub fn events_url(server_url: &str, events_path: &str) -> String {
    let base = http_to_ws_scheme(server_url.trim_end_matches('/'));
    format!("{base}/{}", events_path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_rewrite() {
        let cases = [
            ("https://audit.example.com", "wss://audit.example.com"),
            ("http://127.0.0.1:8080/ws", "ws://127.0.0.1:8080/ws"),
            ("wss://audit.example.com/ws", "wss://audit.example.com/ws"),
            ("ws://localhost/ws", "ws://localhost/ws"),
            (
                "https://audit.example.com/next?u=http://elsewhere",
                "wss://audit.example.com/next?u=http://elsewhere",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(http_to_ws_scheme(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_events_url_joins_path() {
        assert_eq!(events_url("https://audit.example.com/", "/ws"), "wss://audit.example.com/ws");
        assert_eq!(events_url("http://localhost:3000", "ws"), "ws://localhost:3000/ws");
        assert_eq!(
            events_url("https://audit.example.com/tenant/", "/live/events"),
            "wss://audit.example.com/tenant/live/events"
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_input() {
        assert!(connect("not-a-url", "Bearer t").await.is_err());
        assert!(connect("ws://127.0.0.1:1/ws", "Bearer bad\nvalue").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_fails() {
        assert!(connect("ws://127.0.0.1:1/ws", "Bearer t").await.is_err());
    }
}
