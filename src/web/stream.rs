//! `multipart/x-mixed-replace` streams
//!
//! One producer task per response. Each tick runs one unit of work on the
//! blocking pool, frames the result as a complete part and hands it to the
//! response body through a small channel. Cancellation (client gone, server
//! shutting down) is only observed between parts, so the stream framing is
//! never cut inside a part.

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ApiError, AppState};

const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Parts buffered ahead of a slow client
const CHANNEL_CAPACITY: usize = 2;

type Chunk = Result<Bytes, std::io::Error>;

/// Frames bodies as parts of one multipart response.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::with_boundary(Uuid::new_v4().simple().to_string())
    }
}

impl MultipartWriter {
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary={}", self.boundary)
    }

    /// One complete part: delimiter, headers, body.
    pub fn part(&self, content_type: &str, body: &[u8]) -> Bytes {
        let head = format!(
            "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            self.boundary,
            content_type,
            body.len()
        );

        let mut buf = BytesMut::with_capacity(head.len() + body.len() + 2);
        buf.put_slice(head.as_bytes());
        buf.put_slice(body);
        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// Final delimiter, sent when the server ends the stream.
    pub fn close(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }
}

/// Why a stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    ClientGone,
    Shutdown,
    Failed,
}

/// Repeatedly run `produce` and push each result as a part until the client
/// goes away, `shutdown` fires or `produce` fails.
pub async fn pump<F>(
    label: &'static str,
    tx: mpsc::Sender<Chunk>,
    multipart: MultipartWriter,
    period: Duration,
    shutdown: CancellationToken,
    produce: Arc<F>,
) -> StreamEnd
where
    F: Fn() -> Result<Vec<u8>, ApiError> + Send + Sync + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut parts = 0u64;

    let end = loop {
        let work = Arc::clone(&produce);
        let frame = match tokio::task::spawn_blocking(move || work()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!(stream = label, error = %e, "Stream tick failed");
                break StreamEnd::Failed;
            }
            Err(e) => {
                warn!(stream = label, error = %e, "Stream worker panicked");
                break StreamEnd::Failed;
            }
        };

        let part = multipart.part(PART_CONTENT_TYPE, &frame);
        tokio::select! {
            sent = tx.send(Ok(part)) => {
                if sent.is_err() {
                    break StreamEnd::ClientGone;
                }
            }
            _ = shutdown.cancelled() => break StreamEnd::Shutdown,
        }
        parts += 1;

        tokio::select! {
            _ = ticker.tick() => {}
            _ = tx.closed() => break StreamEnd::ClientGone,
            _ = shutdown.cancelled() => break StreamEnd::Shutdown,
        }
    };

    if end != StreamEnd::ClientGone {
        let _ = tx.try_send(Ok(multipart.close()));
    }

    info!(stream = label, parts, reason = ?end, "Closing stream");
    end
}

/// Spawn a [`pump`] and return the streaming response it feeds.
fn spawn_stream<F, A>(label: &'static str, state: &AppState, period: Duration, produce: F, after: A) -> Response
where
    F: Fn() -> Result<Vec<u8>, ApiError> + Send + Sync + 'static,
    A: FnOnce() + Send + 'static,
{
    let multipart = MultipartWriter::default();
    let content_type = multipart.content_type();
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let shutdown = state.shutdown.clone();

    info!(stream = label, "Starting stream");
    tokio::spawn(async move {
        pump(label, tx, multipart, period, shutdown, Arc::new(produce)).await;
        if let Err(e) = tokio::task::spawn_blocking(after).await {
            warn!(stream = label, error = %e, "Stream cleanup panicked");
        }
    });

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// Live view, one transformed JPEG per tick
pub async fn preview_handler(State(state): State<AppState>) -> Response {
    let producer = state.clone();
    let session = Arc::clone(&state.session);

    spawn_stream(
        "preview",
        &state,
        state.stream.preview_interval(),
        move || {
            let mut frame = Vec::new();
            producer.session.capture_preview_frame(&mut frame)?;
            Ok(producer.present(&frame)?)
        },
        move || {
            debug!("Leaving live view");
            session.end_live_view();
        },
    )
}

/// Timed captures, each persisted and streamed as a transformed JPEG
pub async fn auto_capture_handler(State(state): State<AppState>) -> Response {
    let producer = state.clone();

    spawn_stream(
        "auto-capture",
        &state,
        state.stream.auto_capture_interval(),
        move || {
            let captured = producer.pipeline.capture_and_persist()?;
            Ok(producer.present(&captured.viewable)?)
        },
        || {},
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_framing() {
        let writer = MultipartWriter::with_boundary("frame");
        let part = writer.part("image/jpeg", b"\xFF\xD8abc");

        let expected: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n\xFF\xD8abc\r\n";
        assert_eq!(&part[..], expected);
        assert_eq!(writer.close(), Bytes::from_static(b"--frame--\r\n"));
        assert_eq!(writer.content_type(), "multipart/x-mixed-replace; boundary=frame");
    }

    #[test]
    fn test_random_boundaries_differ() {
        let a = MultipartWriter::default();
        let b = MultipartWriter::default();
        assert_ne!(a.boundary(), b.boundary());
        assert_eq!(a.boundary().len(), 32);
    }

    #[tokio::test]
    async fn test_pump_stops_when_client_goes_away() {
        let (tx, mut rx) = mpsc::channel(1);
        let produce = Arc::new(|| -> Result<Vec<u8>, ApiError> { Ok(vec![1, 2, 3]) });

        let task = tokio::spawn(pump(
            "test",
            tx,
            MultipartWriter::with_boundary("b"),
            Duration::from_millis(5),
            CancellationToken::new(),
            produce,
        ));

        let first = rx.recv().await.unwrap().unwrap();
        assert!(first.starts_with(b"--b\r\n"));
        drop(rx);

        assert_eq!(task.await.unwrap(), StreamEnd::ClientGone);
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown_with_closing_delimiter() {
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(pump(
            "test",
            tx,
            MultipartWriter::with_boundary("b"),
            Duration::from_secs(3600),
            shutdown.clone(),
            Arc::new(|| -> Result<Vec<u8>, ApiError> { Ok(vec![0u8; 4]) }),
        ));

        let first = rx.recv().await.unwrap().unwrap();
        assert!(first.ends_with(b"\r\n"));
        shutdown.cancel();

        assert_eq!(task.await.unwrap(), StreamEnd::Shutdown);
        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"--b--\r\n"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_stops_on_failure() {
        let (tx, mut rx) = mpsc::channel(8);
        let produce = Arc::new(|| -> Result<Vec<u8>, ApiError> {
            Err(ApiError::Session(crate::error::SessionError::Closed))
        });

        let end = pump(
            "test",
            tx,
            MultipartWriter::with_boundary("b"),
            Duration::from_millis(1),
            CancellationToken::new(),
            produce,
        )
        .await;

        assert_eq!(end, StreamEnd::Failed);
        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"--b--\r\n"));
    }
}
