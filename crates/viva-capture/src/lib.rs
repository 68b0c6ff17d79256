//! Continuous speech capture for Viva.
//!
//! Wraps an external continuous speech-recognition engine (browser or OS
//! level) behind a two-state controller that detects end-of-utterance via
//! a silence timeout and emits finalized transcripts as [`SpeechSegment`]s.
//! Interim partial results are discarded; downstream consumers only ever
//! see final text.
//!
//! The recognition engine itself is a collaborator, not reimplemented here:
//! it feeds [`RecognitionEvent`]s into the controller over a channel.

pub mod controller;

pub use controller::{
    CaptureConfig, CaptureController, CaptureEvent, CaptureState, RecognitionEvent, SpeechSegment,
};

/// Errors that can occur during speech capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The controller is already listening.
    #[error("capture is already listening")]
    AlreadyListening,

    /// The recognition engine reported a failure. Non-fatal: the controller
    /// returns to idle and can be restarted.
    #[error("recognition engine error: {0}")]
    EngineError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Convenience alias for capture operation results.
pub type CaptureResult<T> = Result<T, CaptureError>;
