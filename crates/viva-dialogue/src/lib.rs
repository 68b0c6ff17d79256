//! Dialogue management for Viva.
//!
//! [`DialogueSession`] owns the conversation history and the active mode
//! (free-form analysis vs. scripted mock interview), and mediates every
//! exchange with the AI collaborator. The collaborator sits behind the
//! [`ExchangeProvider`] trait; [`GeminiProvider`] is the production
//! implementation.
//!
//! Exchange failures are recovered locally: they surface as a visible
//! assistant turn in the transcript, never as an error to the UI layer.
//! Only blank input is rejected outright.
//!
//! [`ExchangeProvider`]: exchange::ExchangeProvider
//! [`GeminiProvider`]: exchange::GeminiProvider

pub mod exchange;
pub mod persona;
pub mod session;

pub use exchange::{
    ExchangeProvider, ExchangeRole, ExchangeTurn, GeminiConfig, GeminiProvider,
};
pub use session::{DialogueMode, DialogueSession, Role, SessionConfig, Turn};

/// Errors that can occur during dialogue operations.
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    /// The user input was blank. No turn is appended and no exchange made.
    #[error("input is empty")]
    EmptyInput,

    /// The AI exchange collaborator failed.
    #[error("exchange error: {0}")]
    ExchangeError(String),

    /// HTTP request failed.
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Convenience alias for dialogue operation results.
pub type DialogueResult<T> = Result<T, DialogueError>;
