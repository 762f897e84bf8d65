//! Error types surfaced by the public API.
//!
//! Transient socket faults are never returned from these APIs; they show up
//! as [`crate::transport::ConnectionStatus::Error`] transitions instead.

/// Errors returned by [`crate::transport::TransportConnection::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No bearer credential is available. Nothing was opened or scheduled.
    MissingCredential,
    /// The configured server URL cannot be turned into an event socket URL.
    InvalidUrl(String),
    /// The supervisor stopped before the first attempt settled.
    Aborted,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "No credential available for the event socket"),
            Self::InvalidUrl(url) => write!(f, "Invalid event socket URL: {url}"),
            Self::Aborted => write!(f, "Connection supervisor stopped before settling"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors returned by `send` on the transport and the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not `Connected`. Nothing was queued.
    NotConnected,
    /// The payload could not be serialized into a frame.
    Encode(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::Encode(msg) => write!(f, "Failed to encode frame: {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Errors returned by [`crate::stream::StreamTailer::open`].
#[derive(Debug)]
pub enum StreamError {
    /// No bearer credential is available.
    MissingCredential,
    /// The resource id is empty or the stream URL cannot be built.
    InvalidResource(String),
    /// The request could not be sent or the response headers never arrived.
    Request(reqwest::Error),
    /// The server answered with a non-success status.
    Status(reqwest::StatusCode),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "No credential available for the stream"),
            Self::InvalidResource(msg) => write!(f, "Invalid stream resource: {msg}"),
            Self::Request(e) => write!(f, "Stream request failed: {e}"),
            Self::Status(status) => write!(f, "Stream rejected with status {status}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        assert_eq!(
            ConnectError::MissingCredential.to_string(),
            "No credential available for the event socket"
        );
        assert!(ConnectError::InvalidUrl("nope".into()).to_string().contains("nope"));
    }

    #[test]
    fn test_send_error_display() {
        assert_eq!(SendError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_stream_error_status_display() {
        let err = StreamError::Status(reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Stream rejected with status 401 Unauthorized");
        assert!(std::error::Error::source(&err).is_none());
    }
}
