//! Session controller.
//!
//! Owns the bound stream, the moment store and the per-action state the
//! console renders from. Each user action follows the same shape: reject
//! if that action is already in flight, clear the previous error, do the
//! work, then record either the result or the failure. Exactly one of
//! those two happens per attempt.
//!
//! The state lock is never held across an await. Actions take what they
//! need under the lock, run the slow part unlocked, then re-lock to
//! record the outcome.

use std::sync::{Arc, Mutex};

use stream_recap_common::config::{CaptureConfig, StreamConfig};
use stream_recap_common::moment::{KeyMoment, MomentStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::encode::{EncodeError, FrameEncoder};
use crate::source::{SourceError, SourceStatus, StreamSource};
use crate::summarize::{SummarizeError, Summarizer};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a capture is already in progress")]
    CaptureBusy,
    #[error("a final summary is already in progress")]
    RecapBusy,
    #[error("no stream is loaded")]
    NoStream,
    #[error("no key moments have been captured yet")]
    NoMoments,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Summarize(#[from] SummarizeError),
}

impl SessionError {
    /// Busy rejections leave the session untouched; callers may want to
    /// render them differently from recorded errors.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionError::CaptureBusy | SessionError::RecapBusy)
    }
}

/// Whether a given action is currently running. One record per action,
/// so a capture in flight never blocks a recap or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    Idle,
    InFlight,
}

impl ActionState {
    fn is_in_flight(self) -> bool {
        self == ActionState::InFlight
    }
}

struct State {
    source: Option<StreamSource>,
    /// Last stream status transition already folded into the session,
    /// by transition counter. See [`Session::snapshot`].
    source_status_seq: u64,
    capture: ActionState,
    recap: ActionState,
    last_error: Option<String>,
    final_summary: Option<String>,
}

/// Everything the console needs to render one status view.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub stream_url: Option<String>,
    pub source_status: Option<SourceStatus>,
    pub capturing: bool,
    pub summarizing: bool,
    pub moment_count: usize,
    pub last_error: Option<String>,
    pub final_summary: Option<String>,
}

pub struct Session {
    state: Mutex<State>,
    store: MomentStore,
    encoder: FrameEncoder,
    summarizer: Arc<dyn Summarizer>,
    stream_config: StreamConfig,
}

impl Session {
    pub fn new(
        stream_config: StreamConfig,
        capture_config: &CaptureConfig,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                source: None,
                source_status_seq: 0,
                capture: ActionState::Idle,
                recap: ActionState::Idle,
                last_error: None,
                final_summary: None,
            }),
            store: MomentStore::new(),
            encoder: FrameEncoder::new(capture_config),
            summarizer,
            stream_config,
        }
    }

    /// Binds a stream URL, replacing any previously bound stream. The
    /// previous source's reader task stops when it is dropped here.
    pub fn load_stream(&self, url: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.last_error = None;

        match StreamSource::bind(&self.stream_config, url) {
            Ok(source) => {
                info!(url = %source.url(), mode = %self.stream_config.mode, "stream bound");
                // The source starts out connecting; only transitions after
                // this point are news.
                state.source_status_seq = source.status().0;
                state.source = Some(source);
                Ok(())
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!(url = %url, error = %err, "stream bind rejected");
                state.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Captures the current frame: encode it, have the summarizer
    /// describe it, and append the pair to the store. On any failure
    /// nothing is appended and the error is recorded instead.
    pub async fn capture_moment(&self) -> Result<KeyMoment, SessionError> {
        let frame = {
            let mut state = self.state.lock().unwrap();
            if state.capture.is_in_flight() {
                return Err(SessionError::CaptureBusy);
            }
            state.last_error = None;

            match state.source.as_ref().map(|s| s.current_frame()) {
                Some(Ok(frame)) => {
                    state.capture = ActionState::InFlight;
                    frame
                }
                Some(Err(e)) => return Err(self.record_failure(&mut state, e.into())),
                None => return Err(self.record_failure(&mut state, SessionError::NoStream)),
            }
        };

        let outcome = async {
            let image = self.encoder.encode(&frame.data)?;
            let summary = self.summarizer.describe_frame(&image.base64).await?;
            Ok::<_, SessionError>((image, summary))
        }
        .await;

        let mut state = self.state.lock().unwrap();
        state.capture = ActionState::Idle;
        match outcome {
            Ok((image, summary)) => {
                let moment = self.store.append(image, summary, frame.captured_at_ms);
                info!(id = moment.id, frame_seq = frame.seq, "key moment captured");
                Ok(moment)
            }
            Err(e) => Err(self.record_failure(&mut state, e)),
        }
    }

    /// Produces the final summary over every captured moment, in capture
    /// order. Success replaces the previous final summary; failure keeps
    /// it and records the error.
    pub async fn summarize_all(&self) -> Result<String, SessionError> {
        let summaries = {
            let mut state = self.state.lock().unwrap();
            if state.recap.is_in_flight() {
                return Err(SessionError::RecapBusy);
            }
            state.last_error = None;

            let summaries = self.store.summaries();
            if summaries.is_empty() {
                return Err(self.record_failure(&mut state, SessionError::NoMoments));
            }
            state.recap = ActionState::InFlight;
            summaries
        };

        let outcome = self.summarizer.summarize_moments(&summaries).await;

        let mut state = self.state.lock().unwrap();
        state.recap = ActionState::Idle;
        match outcome {
            Ok(text) => {
                info!(moments = summaries.len(), chars = text.len(), "final summary updated");
                state.final_summary = Some(text.clone());
                Ok(text)
            }
            Err(e) => Err(self.record_failure(&mut state, e.into())),
        }
    }

    /// Current view of the session. Also folds in any stream status
    /// transition that happened since the last snapshot: a stream going
    /// live clears the error slot, a stream failure fills it.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut state = self.state.lock().unwrap();

        let source_status = match state.source.as_ref().map(|source| source.status()) {
            Some((seq, status)) => {
                if seq != state.source_status_seq {
                    state.source_status_seq = seq;
                    match &status {
                        SourceStatus::Live => state.last_error = None,
                        SourceStatus::Failed(reason) => {
                            state.last_error = Some(format!("stream failed: {reason}"));
                        }
                        SourceStatus::Connecting | SourceStatus::Ended => {}
                    }
                }
                Some(status)
            }
            None => None,
        };

        SessionSnapshot {
            stream_url: state.source.as_ref().map(|s| s.url().to_string()),
            source_status,
            capturing: state.capture.is_in_flight(),
            summarizing: state.recap.is_in_flight(),
            moment_count: self.store.count(),
            last_error: state.last_error.clone(),
            final_summary: state.final_summary.clone(),
        }
    }

    pub fn moments(&self) -> Vec<KeyMoment> {
        self.store.all()
    }

    pub fn moment(&self, id: u64) -> Option<KeyMoment> {
        self.store.get(id)
    }

    pub fn moment_count(&self) -> usize {
        self.store.count()
    }

    fn record_failure(&self, state: &mut State, err: SessionError) -> SessionError {
        warn!(error = %err, "action failed");
        state.last_error = Some(err.to_string());
        err
    }

    #[cfg(test)]
    fn install_source(&self, source: StreamSource) {
        let mut state = self.state.lock().unwrap();
        state.source_status_seq = source.status().0;
        state.source = Some(source);
    }

    /// Test hook: make the source's current status look like a fresh
    /// transition, as if it happened after the last snapshot.
    #[cfg(test)]
    fn mark_status_pending(&self) {
        self.state.lock().unwrap().source_status_seq = 0;
    }
}
