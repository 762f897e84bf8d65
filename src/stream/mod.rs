//! Per-resource live log streams.
//!
//! [`StreamTailer::open`] issues one long-lived HTTP GET for a resource and
//! delivers every line, decoded as JSON, to the callback that opened it. The
//! stream is independent of the event socket: it has its own credential
//! lookup, its own lifecycle and no reconnection. When the server ends the
//! body or the connection fails, the stream simply stops.
//!
//! # Cancellation
//!
//! Delivery happens under a per-stream lock that [`StreamHandle::cancel`]
//! also takes, so once `cancel()` returns the callback will not run again.
//! Calling `cancel()` from inside the callback is allowed; the current
//! delivery finishes and nothing further is delivered.

pub mod lines;

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::constants::{RESOURCE_PLACEHOLDER, STREAM_MAX_LINE_BYTES};
use crate::credentials::CredentialProvider;
use crate::error::StreamError;

use self::lines::{Line, LineCodec};

/// Callback receiving decoded stream events.
type EventCallback = Box<dyn FnMut(Value) + Send>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the stream whose callback is running on this thread, or 0.
    static DELIVERING: Cell<u64> = const { Cell::new(0) };
}

/// Restores [`DELIVERING`] even if the callback unwinds.
struct DeliveringGuard(u64);

impl DeliveringGuard {
    fn enter(id: u64) -> Self {
        Self(DELIVERING.with(|current| current.replace(id)))
    }
}

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.0));
    }
}

/// Callback slot shared by the reader task and the handle.
struct Delivery {
    id: u64,
    resource_id: String,
    cancelled: AtomicBool,
    callback: Mutex<Option<EventCallback>>,
}

impl Delivery {
    fn new(resource_id: &str, callback: EventCallback) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            resource_id: resource_id.to_string(),
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
        }
    }

    /// Hand one event to the callback. Returns `false` once cancelled.
    fn deliver(&self, event: Value) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        let Some(callback) = slot.as_mut() else {
            return false;
        };

        let _delivering = DeliveringGuard::enter(self.id);
        if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            log::error!("[stream] {}: callback panicked", self.resource_id);
        }
        !self.cancelled.load(Ordering::Acquire)
    }

    /// Stop delivery. Returns `false` if already cancelled.
    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if DELIVERING.with(Cell::get) == self.id {
            // Inside our own callback: the slot is locked by this thread.
            return true;
        }
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Why a reader stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// `cancel()` or drop of the handle.
    Cancelled,
    /// The server finished the body.
    Finished,
    /// The connection failed mid-stream.
    Failed(String),
}

/// Handle to one open stream.
///
/// Dropping the handle cancels the stream.
pub struct StreamHandle {
    delivery: Arc<Delivery>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.delivery.id)
            .field("resource_id", &self.delivery.resource_id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl StreamHandle {
    /// Start a reader over `source` delivering to `callback`.
    fn spawn<R>(resource_id: &str, source: R, callback: EventCallback) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let delivery = Arc::new(Delivery::new(resource_id, callback));
        let stop = CancellationToken::new();
        let done = CancellationToken::new();

        let reader_delivery = Arc::clone(&delivery);
        let reader_stop = stop.clone();
        let reader_done = done.clone();
        tokio::spawn(async move {
            let _done = reader_done.drop_guard();
            let end = read_stream(source, &reader_delivery, &reader_stop).await;
            match &end {
                StreamEnd::Cancelled => {
                    log::debug!("[stream] {}: cancelled", reader_delivery.resource_id);
                }
                StreamEnd::Finished => {
                    log::info!("[stream] {}: server ended the stream", reader_delivery.resource_id);
                }
                StreamEnd::Failed(reason) => {
                    log::info!("[stream] {}: stream failed: {reason}", reader_delivery.resource_id);
                }
            }
        });

        Self {
            delivery,
            stop,
            done,
        }
    }

    /// Resource this stream tails.
    pub fn resource_id(&self) -> &str {
        &self.delivery.resource_id
    }

    /// Stop the stream. Idempotent; no event is delivered after it returns.
    pub fn cancel(&self) {
        if self.delivery.cancel() {
            log::debug!("[stream] {}: cancel requested", self.delivery.resource_id);
        }
        self.stop.cancel();
    }

    /// Whether the stream is still delivering.
    pub fn is_active(&self) -> bool {
        !self.delivery.is_cancelled() && !self.done.is_cancelled()
    }

    /// Resolves once the reader task has stopped for any reason.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Read lines from `source` until cancelled, finished or failed.
///
/// Over-long, non-UTF-8 and unparseable lines are dropped one at a time.
async fn read_stream<R>(source: R, delivery: &Delivery, stop: &CancellationToken) -> StreamEnd
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(source, LineCodec::new(STREAM_MAX_LINE_BYTES));

    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => return StreamEnd::Cancelled,
            next = frames.next() => next,
        };

        let raw = match next {
            Some(Ok(Line::Text(raw))) => raw,
            Some(Ok(Line::Oversized)) => {
                log::warn!(
                    "[stream] {}: dropping line longer than {STREAM_MAX_LINE_BYTES} bytes",
                    delivery.resource_id
                );
                continue;
            }
            Some(Err(e)) => return StreamEnd::Failed(e.to_string()),
            None => return StreamEnd::Finished,
        };

        let Ok(line) = std::str::from_utf8(&raw) else {
            log::warn!("[stream] {}: dropping line that is not UTF-8", delivery.resource_id);
            continue;
        };
        match lines::parse_event(line) {
            Some(Ok(event)) => {
                if !delivery.deliver(event) {
                    return StreamEnd::Cancelled;
                }
            }
            Some(Err(e)) => {
                log::warn!("[stream] {}: dropping unparseable line: {e}", delivery.resource_id);
            }
            None => {}
        }
    }
}

/// Opens resource streams against the dashboard server.
#[derive(Clone)]
pub struct StreamTailer {
    client: reqwest::Client,
    server_url: String,
    stream_path: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for StreamTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTailer")
            .field("server_url", &self.server_url)
            .field("stream_path", &self.stream_path)
            .finish_non_exhaustive()
    }
}

impl StreamTailer {
    /// Tailer with a default HTTP client.
    pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_client(reqwest::Client::new(), config, credentials)
    }

    /// Tailer sharing an existing HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            server_url: config.server_url.clone(),
            stream_path: config.stream_path.clone(),
            credentials,
        }
    }

    /// URL of the stream for `resource_id`, with the id percent-encoded as a
    /// single path segment.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidResource`] for an empty id, an unparseable
    /// server URL, or a path template without `{resource}`.
    pub fn stream_url(&self, resource_id: &str) -> Result<reqwest::Url, StreamError> {
        if resource_id.trim().is_empty() {
            return Err(StreamError::InvalidResource("empty resource id".to_string()));
        }
        if !self.stream_path.contains(RESOURCE_PLACEHOLDER) {
            return Err(StreamError::InvalidResource(format!(
                "stream path {:?} has no {RESOURCE_PLACEHOLDER} segment",
                self.stream_path
            )));
        }

        let mut url = reqwest::Url::parse(&self.server_url)
            .map_err(|e| StreamError::InvalidResource(format!("bad server URL: {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                StreamError::InvalidResource("server URL cannot carry a path".to_string())
            })?;
            segments.pop_if_empty();
            for segment in self.stream_path.split('/').filter(|s| !s.is_empty()) {
                if segment == RESOURCE_PLACEHOLDER {
                    segments.push(resource_id);
                } else {
                    segments.push(segment);
                }
            }
        }
        Ok(url)
    }

    /// Open the stream for `resource_id`.
    ///
    /// Suspends until the response headers arrive, then delivers events to
    /// `on_event` in server order from a background task.
    ///
    /// # Errors
    ///
    /// [`StreamError::MissingCredential`], [`StreamError::InvalidResource`],
    /// [`StreamError::Request`] when the request fails, or
    /// [`StreamError::Status`] for a non-success response.
    pub async fn open<F>(&self, resource_id: &str, on_event: F) -> Result<StreamHandle, StreamError>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let url = self.stream_url(resource_id)?;
        let credential = self
            .credentials
            .credential()
            .await
            .ok_or(StreamError::MissingCredential)?;

        log::info!("[stream] Opening {url}");
        let response = self
            .client
            .get(url)
            .bearer_auth(credential.token())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("[stream] {resource_id}: server answered {status}");
            return Err(StreamError::Status(status));
        }

        let body = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );
        Ok(StreamHandle::spawn(
            resource_id,
            StreamReader::new(body),
            Box::new(on_event),
        ))
    }
}
