//! Text preparation for speech synthesis.
//!
//! Assistant replies arrive as markdown-flavored prose that text-to-speech
//! engines read badly. This crate turns them into clean, bounded segments:
//!
//! - [`sanitize`]: strip markup noise and rewrite punctuation so the text
//!   reads naturally when spoken.
//! - [`split`]: cut sanitized text into sentence-aligned chunks that fit a
//!   synthesis request.
//!
//! Both operations are pure and total. An empty result from [`sanitize`]
//! means there is nothing to speak; callers skip synthesis in that case.

pub mod chunk;
pub mod sanitize;

pub use chunk::{split, Chunk, DEFAULT_MAX_CHUNK_LEN};
pub use sanitize::sanitize;
