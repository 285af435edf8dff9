//! Media source adapter.
//!
//! Binds a live stream URL and keeps exactly one decoded frame around:
//! the most recent one. `current_frame` hands out a copy of that frame
//! without disturbing playback, which is all the capture path needs.
//!
//! Two transports are supported, matching what cameras actually serve:
//! `mjpeg` reads a single multipart response forever, `polling` fetches
//! a still-image endpoint at a fixed rate.

mod mjpeg;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use stream_recap_common::config::StreamConfig;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mjpeg::{boundary_from_content_type, MjpegParser};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("stream URL is empty")]
    EmptyUrl,
    #[error("stream URL must start with http:// or https://")]
    UnsupportedScheme,
    #[error("unknown stream mode {0:?}, expected \"mjpeg\" or \"polling\"")]
    UnknownMode(String),
    #[error("no frame received from the stream yet")]
    NoFrame,
}

/// Where the bound stream currently stands. Transitions are produced by
/// the reader task and observed by whoever polls [`StreamSource::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    /// Bound, no frame seen yet.
    Connecting,
    /// At least one frame has been received.
    Live,
    /// The stream could not be read; carries a human-readable reason.
    Failed(String),
    /// The server closed the stream normally.
    Ended,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Connecting => write!(f, "connecting"),
            SourceStatus::Live => write!(f, "live"),
            SourceStatus::Failed(reason) => write!(f, "failed: {reason}"),
            SourceStatus::Ended => write!(f, "ended"),
        }
    }
}

/// One frame as pulled off the wire, before any re-encoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

#[derive(Debug)]
struct Shared {
    latest: Mutex<Option<RawFrame>>,
    /// Status plus a transition counter, so observers can tell a fresh
    /// transition from one they have already reacted to.
    status: Mutex<(u64, SourceStatus)>,
}

impl Shared {
    fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            status: Mutex::new((1, SourceStatus::Connecting)),
        }
    }

    fn set_status(&self, status: SourceStatus) {
        let mut slot = self.status.lock().unwrap();
        slot.0 += 1;
        debug!(seq = slot.0, status = %status, "stream status changed");
        slot.1 = status;
    }

    fn is_live(&self) -> bool {
        matches!(self.status.lock().unwrap().1, SourceStatus::Live)
    }

    fn frame_arrived(&self, data: Vec<u8>, seq: u64) {
        let bytes = data.len();
        let frame = RawFrame {
            data,
            captured_at_ms: Utc::now().timestamp_millis(),
            seq,
        };
        *self.latest.lock().unwrap() = Some(frame);
        if self.is_live() {
            debug!(seq, bytes, "frame updated");
        } else {
            info!(seq, bytes, "first frame received, stream is live");
            self.set_status(SourceStatus::Live);
        }
    }
}

/// A bound live stream. Dropping it stops the reader task.
#[derive(Debug)]
pub struct StreamSource {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    url: String,
}

impl StreamSource {
    /// Validates the URL, then spawns a reader task for the configured
    /// transport. Validation failures are reported synchronously; network
    /// failures surface later through [`status`](Self::status).
    pub fn bind(config: &StreamConfig, url: &str) -> Result<Self, SourceError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SourceError::EmptyUrl);
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SourceError::UnsupportedScheme);
        }

        let shared = Arc::new(Shared::new());
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let handle = match config.mode.as_str() {
            "mjpeg" => tokio::spawn(run_mjpeg_reader(
                url.to_string(),
                connect_timeout,
                Arc::clone(&shared),
            )),
            "polling" => {
                let fps = if config.poll_fps > 0.0 { config.poll_fps } else { 1.0 };
                tokio::spawn(run_polling_reader(
                    url.to_string(),
                    Duration::from_secs_f64(1.0 / fps),
                    connect_timeout,
                    Arc::clone(&shared),
                ))
            }
            other => return Err(SourceError::UnknownMode(other.to_string())),
        };

        Ok(Self {
            shared,
            handle: Some(handle),
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// A copy of the most recent frame. Errors until the first frame of
    /// the bound stream has been received.
    pub fn current_frame(&self) -> Result<RawFrame, SourceError> {
        self.shared
            .latest
            .lock()
            .unwrap()
            .clone()
            .ok_or(SourceError::NoFrame)
    }

    /// Current status with its transition counter.
    pub fn status(&self) -> (u64, SourceStatus) {
        self.shared.status.lock().unwrap().clone()
    }

    #[cfg(test)]
    pub(crate) fn fixed(url: &str, frame: Option<RawFrame>, status: SourceStatus) -> Self {
        let shared = Arc::new(Shared::new());
        *shared.latest.lock().unwrap() = frame;
        shared.set_status(status);
        Self {
            shared,
            handle: None,
            url: url.to_string(),
        }
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_mjpeg_reader(url: String, connect_timeout: Duration, shared: Arc<Shared>) {
    let client = match reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            shared.set_status(SourceStatus::Failed(format!(
                "failed to create HTTP client: {e}"
            )));
            return;
        }
    };

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "connection to stream failed");
            shared.set_status(SourceStatus::Failed(format!("connection failed: {e}")));
            return;
        }
    };
    if !response.status().is_success() {
        let code = response.status().as_u16();
        warn!(url = %url, status = code, "stream returned an error status");
        shared.set_status(SourceStatus::Failed(format!("stream returned HTTP {code}")));
        return;
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let boundary = match content_type.as_deref().and_then(boundary_from_content_type) {
        Some(boundary) => boundary,
        None => {
            let ct = content_type.unwrap_or_else(|| "<missing>".to_string());
            warn!(url = %url, content_type = %ct, "response is not an MJPEG stream");
            shared.set_status(SourceStatus::Failed(format!(
                "not an MJPEG stream (content-type: {ct})"
            )));
            return;
        }
    };
    info!(url = %url, boundary = %boundary, "connected to MJPEG stream");

    let mut parser = MjpegParser::new(&boundary);
    let mut byte_stream = response.bytes_stream();
    let mut seq: u64 = 0;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(url = %url, error = %e, "stream read failed");
                shared.set_status(SourceStatus::Failed(format!("stream read failed: {e}")));
                return;
            }
        };
        for body in parser.push(&chunk) {
            seq += 1;
            shared.frame_arrived(body, seq);
        }
    }

    info!(url = %url, frames = seq, "stream ended");
    shared.set_status(SourceStatus::Ended);
}

async fn run_polling_reader(
    url: String,
    interval: Duration,
    connect_timeout: Duration,
    shared: Arc<Shared>,
) {
    let client = match reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            shared.set_status(SourceStatus::Failed(format!(
                "failed to create HTTP client: {e}"
            )));
            return;
        }
    };
    info!(url = %url, interval_ms = interval.as_millis() as u64, "polling still-image endpoint");

    let mut ticker = tokio::time::interval(interval);
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;

        let failure = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(body) => {
                    seq += 1;
                    shared.frame_arrived(body.to_vec(), seq);
                    continue;
                }
                Err(e) => format!("failed to read frame body: {e}"),
            },
            Ok(response) => format!("stream returned HTTP {}", response.status().as_u16()),
            Err(e) => format!("connection failed: {e}"),
        };

        // Before the first frame a failure means the bind itself is bad,
        // so give up. After that, skip the tick and keep the last frame.
        if shared.is_live() {
            warn!(url = %url, error = %failure, "poll failed, keeping last frame");
        } else {
            warn!(url = %url, error = %failure, "polling source failed before first frame");
            shared.set_status(SourceStatus::Failed(failure));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: &str) -> StreamConfig {
        StreamConfig {
            url: String::new(),
            mode: mode.to_string(),
            poll_fps: 1.0,
            connect_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn bind_rejects_empty_url() {
        let err = StreamSource::bind(&config("mjpeg"), "   ").unwrap_err();
        assert!(matches!(err, SourceError::EmptyUrl));
    }

    #[tokio::test]
    async fn bind_rejects_non_http_url() {
        let err = StreamSource::bind(&config("mjpeg"), "rtsp://cam/stream").unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedScheme));
    }

    #[tokio::test]
    async fn bind_rejects_unknown_mode() {
        let err = StreamSource::bind(&config("webrtc"), "http://cam/stream").unwrap_err();
        assert!(matches!(err, SourceError::UnknownMode(mode) if mode == "webrtc"));
    }

    #[tokio::test]
    async fn current_frame_errors_before_first_frame() {
        let source = StreamSource::fixed("http://cam/stream", None, SourceStatus::Connecting);
        assert!(matches!(
            source.current_frame(),
            Err(SourceError::NoFrame)
        ));
    }

    #[tokio::test]
    async fn current_frame_returns_latest_copy() {
        let frame = RawFrame {
            data: vec![1, 2, 3],
            captured_at_ms: 1_700_000_000_000,
            seq: 7,
        };
        let source = StreamSource::fixed("http://cam/stream", Some(frame), SourceStatus::Live);
        let got = source.current_frame().unwrap();
        assert_eq!(got.data, vec![1, 2, 3]);
        assert_eq!(got.seq, 7);
    }

    #[tokio::test]
    async fn status_transitions_bump_the_counter() {
        let shared = Shared::new();
        let (seq0, status0) = shared.status.lock().unwrap().clone();
        assert_eq!(status0, SourceStatus::Connecting);

        shared.frame_arrived(vec![0xFF], 1);
        let (seq1, status1) = shared.status.lock().unwrap().clone();
        assert_eq!(status1, SourceStatus::Live);
        assert!(seq1 > seq0);

        // A later frame keeps the stream live without a new transition.
        shared.frame_arrived(vec![0xD8], 2);
        let (seq2, status2) = shared.status.lock().unwrap().clone();
        assert_eq!(status2, SourceStatus::Live);
        assert_eq!(seq2, seq1);
    }
}
