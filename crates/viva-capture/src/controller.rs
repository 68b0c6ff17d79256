//! Capture controller state machine.
//!
//! [`CaptureController`] runs a loop over recognition events with a single
//! owned silence timer. State is `Idle` or `Listening`; a silence timeout
//! (when auto-stop is enabled), an engine error, engine end-of-stream, or
//! an explicit [`stop`](CaptureController::stop) all return it to `Idle`.
//!
//! Finalized transcripts become [`SpeechSegment`]s with a monotonically
//! increasing sequence number. With auto-send enabled each segment is
//! forwarded immediately on the event channel; with it disabled the latest
//! segment is buffered until the caller confirms it, and a newer segment
//! overwrites an unconfirmed one.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{CaptureError, CaptureResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the capture controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Silence duration in milliseconds after the last finalized utterance
    /// before listening ends (when `auto_stop` is enabled).
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// Whether the silence timer stops capture automatically.
    #[serde(default = "default_auto_stop")]
    pub auto_stop: bool,

    /// Whether finalized segments are forwarded immediately. When false,
    /// the latest segment is held for explicit confirmation instead.
    #[serde(default = "default_auto_send")]
    pub auto_send: bool,
}

fn default_silence_timeout_ms() -> u64 {
    10_000
}

fn default_auto_stop() -> bool {
    true
}

fn default_auto_send() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
            auto_stop: default_auto_stop(),
            auto_send: default_auto_send(),
        }
    }
}

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

/// Capture controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not capturing.
    Idle,
    /// Continuously capturing microphone input.
    Listening,
}

/// A finalized transcript with its position in the capture sequence.
///
/// Consumed at most once by a dialogue exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Monotonically increasing per-controller sequence number.
    pub sequence: u64,
    /// The finalized transcript text.
    pub text: String,
}

/// Events produced by the external recognition engine.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// A partial in-progress transcript. Always discarded.
    Interim(String),
    /// A completed utterance transcript.
    Final(String),
    /// The engine failed. Capture returns to idle and can be restarted.
    Error(String),
    /// The engine ended its stream.
    Ended,
}

/// Events emitted by the controller.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A finalized segment, forwarded under the auto-send policy.
    Segment(SpeechSegment),
    /// A finalized segment buffered for explicit confirmation.
    SegmentPending(SpeechSegment),
    /// The silence timer fired and stopped capture.
    SilenceTimeout,
    /// The recognition engine reported an error.
    Error(String),
    /// Capture stopped (for any reason). Emitted exactly once per run.
    Stopped,
}

// ---------------------------------------------------------------------------
// CaptureController
// ---------------------------------------------------------------------------

/// Two-state speech capture controller with an owned silence timer.
pub struct CaptureController {
    config: CaptureConfig,
    listening: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    pending: Arc<Mutex<Option<SpeechSegment>>>,
    cancel: Mutex<CancellationToken>,
    event_tx: mpsc::Sender<CaptureEvent>,
}

impl CaptureController {
    /// Create a new controller emitting [`CaptureEvent`]s on `event_tx`.
    pub fn new(config: CaptureConfig, event_tx: mpsc::Sender<CaptureEvent>) -> Self {
        Self {
            config,
            listening: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(None)),
            cancel: Mutex::new(CancellationToken::new()),
            event_tx,
        }
    }

    /// Return the current state.
    pub fn state(&self) -> CaptureState {
        if self.listening.load(Ordering::Relaxed) {
            CaptureState::Listening
        } else {
            CaptureState::Idle
        }
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Take the buffered unconfirmed segment, if any.
    ///
    /// Used when auto-send is disabled: the caller confirms the pending
    /// segment by consuming it here.
    pub fn take_pending(&self) -> Option<SpeechSegment> {
        lock_recover(&self.pending).take()
    }

    /// Start listening: `Idle` -> `Listening`.
    ///
    /// Consumes the engine's event stream in a background task until the
    /// silence timer fires, the engine errors or ends, or [`stop`] is
    /// called. Returns an error if already listening.
    ///
    /// [`stop`]: CaptureController::stop
    pub fn start(
        &self,
        events: mpsc::Receiver<RecognitionEvent>,
    ) -> CaptureResult<tokio::task::JoinHandle<()>> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyListening);
        }

        let token = CancellationToken::new();
        *lock_recover_token(&self.cancel) = token.clone();

        let config = self.config.clone();
        let listening = self.listening.clone();
        let sequence = self.sequence.clone();
        let pending = self.pending.clone();
        let event_tx = self.event_tx.clone();

        tracing::info!(
            silence_timeout_ms = config.silence_timeout_ms,
            auto_stop = config.auto_stop,
            auto_send = config.auto_send,
            "capture started"
        );

        Ok(tokio::spawn(async move {
            capture_loop(config, events, token, sequence, pending, &event_tx).await;
            listening.store(false, Ordering::SeqCst);
            let _ = event_tx.send(CaptureEvent::Stopped).await;
            tracing::info!("capture stopped");
        }))
    }

    /// Stop listening: `Listening` -> `Idle`, unconditionally.
    ///
    /// Cancels the silence timer and ends the capture loop. Stopping an
    /// already-idle controller is a no-op.
    pub fn stop(&self) {
        lock_recover_token(&self.cancel).cancel();
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock_recover(m: &Mutex<Option<SpeechSegment>>) -> std::sync::MutexGuard<'_, Option<SpeechSegment>> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_recover_token(m: &Mutex<CancellationToken>) -> std::sync::MutexGuard<'_, CancellationToken> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Main capture loop: recognition events vs. the silence timer.
///
/// The timer is armed on each finalized utterance, never on interim
/// results, so a long pause after speech ends the listening window.
async fn capture_loop(
    config: CaptureConfig,
    mut events: mpsc::Receiver<RecognitionEvent>,
    cancel: CancellationToken,
    sequence: Arc<AtomicU64>,
    pending: Arc<Mutex<Option<SpeechSegment>>>,
    event_tx: &mpsc::Sender<CaptureEvent>,
) {
    let timeout = std::time::Duration::from_millis(config.silence_timeout_ms);
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        let silence = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("capture cancelled");
                return;
            }
            _ = silence, if config.auto_stop => {
                tracing::debug!(timeout_ms = config.silence_timeout_ms, "silence timeout");
                let _ = event_tx.send(CaptureEvent::SilenceTimeout).await;
                return;
            }
            event = events.recv() => match event {
                None | Some(RecognitionEvent::Ended) => {
                    tracing::debug!("recognition stream ended");
                    return;
                }
                Some(RecognitionEvent::Interim(text)) => {
                    // Downstream consumers require final text only.
                    tracing::trace!(len = text.len(), "discarding interim result");
                }
                Some(RecognitionEvent::Error(message)) => {
                    tracing::warn!(error = %message, "recognition engine error");
                    let _ = event_tx.send(CaptureEvent::Error(message)).await;
                    return;
                }
                Some(RecognitionEvent::Final(text)) => {
                    deadline = Some(tokio::time::Instant::now() + timeout);
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    let segment = SpeechSegment {
                        sequence: sequence.fetch_add(1, Ordering::SeqCst),
                        text,
                    };
                    tracing::debug!(sequence = segment.sequence, "finalized utterance");
                    if config.auto_send {
                        let _ = event_tx.send(CaptureEvent::Segment(segment)).await;
                    } else {
                        *lock_recover(&pending) = Some(segment.clone());
                        let _ = event_tx.send(CaptureEvent::SegmentPending(segment)).await;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
