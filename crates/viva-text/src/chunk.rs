//! Sentence-aligned chunking for speech synthesis.
//!
//! Long replies are synthesized one bounded chunk at a time so that audio
//! starts early and a single failed request loses only one chunk. Chunks
//! never split a sentence: prosody wins over strict length.

use serde::{Deserialize, Serialize};

/// Default maximum chunk length in characters.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 200;

/// A bounded-length, sentence-aligned slice of one reply, ordered by `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based, contiguous position within the reply.
    pub index: usize,
    /// The chunk text, one or more whole sentences.
    pub text: String,
}

/// Split `text` into sentences on terminal punctuation (`.`, `!`, `?`).
///
/// A run of terminal punctuation stays attached to its sentence. Trailing
/// text without terminal punctuation forms a final sentence of its own.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut buf = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        buf.push(c);
        if matches!(c, '.' | '!' | '?') {
            while matches!(chars.peek(), Some('.' | '!' | '?')) {
                if let Some(p) = chars.next() {
                    buf.push(p);
                }
            }
            let sentence = buf.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            buf.clear();
        }
    }

    let tail = buf.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Split sanitized text into ordered chunks of at most `max_len` characters.
///
/// Lengths are measured in characters, not bytes, so accented or non-Latin
/// replies pack the same as ASCII. Consecutive sentences are packed greedily:
/// the running buffer is flushed as one chunk when appending the next
/// sentence would exceed `max_len`.
/// A single sentence longer than `max_len` becomes its own oversized chunk,
/// never split mid-sentence. Input with no terminal punctuation yields one
/// chunk. Output indexes are 0-based and contiguous; no chunk is empty.
pub fn split(text: &str, max_len: usize) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buf = String::new();

    let mut flush = |buf: &mut String, chunks: &mut Vec<Chunk>| {
        if !buf.is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                text: std::mem::take(buf),
            });
        }
    };

    for sentence in split_sentences(text) {
        if buf.is_empty() {
            buf = sentence;
        } else if buf.chars().count() + sentence.chars().count() <= max_len {
            buf.push(' ');
            buf.push_str(&sentence);
        } else {
            flush(&mut buf, &mut chunks);
            buf = sentence;
        }
    }
    flush(&mut buf, &mut chunks);

    chunks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn greedy_packing_flushes_at_limit() {
        // "Hello world." is 12 chars; adding the 15-char second sentence
        // would make 27 > 15, so the buffer flushes first.
        let chunks = split("Hello world. This is a test!", 15);
        assert_eq!(texts(&chunks), vec!["Hello world.", "This is a test!"]);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn packs_sentences_that_fit_together() {
        let chunks = split("One. Two. Three.", 200);
        assert_eq!(texts(&chunks), vec!["One. Two. Three."]);
    }

    #[test]
    fn oversized_sentence_kept_intact() {
        let long = "This single sentence is far longer than the limit allows.";
        let chunks = split(long, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, long);
    }

    #[test]
    fn no_terminal_punctuation_is_one_chunk() {
        let chunks = split("no punctuation at all here", 10);
        assert_eq!(texts(&chunks), vec!["no punctuation at all here"]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split("", 200).is_empty());
        assert!(split("   ", 200).is_empty());
    }

    #[test]
    fn punctuation_runs_stay_attached() {
        let chunks = split("Really?! Yes... sure.", 8);
        assert_eq!(texts(&chunks), vec!["Really?!", "Yes...", "sure."]);
    }

    #[test]
    fn indexes_are_contiguous_from_zero() {
        let chunks = split("A. B. C. D. E.", 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(!chunk.text.is_empty());
        }
    }

    #[test]
    fn concatenation_reconstructs_sentence_sequence() {
        let input = "First sentence here. Second one follows! A third? And a trailing tail";
        for max_len in [5, 20, 50, 200] {
            let chunks = split(input, max_len);
            let rejoined = texts(&chunks).join(" ");
            let direct = split_sentences(input).join(" ");
            assert_eq!(rejoined, direct, "max_len={max_len}");
        }
    }

    #[test]
    fn chunks_respect_limit_unless_single_sentence_exceeds_it() {
        let input = "Short. Also short. A noticeably longer sentence that runs on. Tail.";
        let max_len = 25;
        for chunk in split(input, max_len) {
            let sentence_count = chunk.text.matches(['.', '!', '?']).count();
            if chunk.text.len() > max_len {
                assert_eq!(sentence_count, 1, "oversized chunk must be one sentence");
            }
        }
    }

    #[test]
    fn packing_counts_characters_not_bytes() {
        // 12 + 11 = 23 characters together, but 26 bytes; a byte-length
        // comparison would flush early.
        let chunks = split("Héllo wörld. Ça va bien!", 23);
        assert_eq!(texts(&chunks), vec!["Héllo wörld. Ça va bien!"]);
    }

    #[test]
    fn chunk_serialization_roundtrip() {
        let chunk = Chunk {
            index: 3,
            text: "Hello there.".to_string(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn default_max_len_is_200() {
        assert_eq!(DEFAULT_MAX_CHUNK_LEN, 200);
    }
}
