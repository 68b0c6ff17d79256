//! Speakable-text normalization.
//!
//! TTS engines stumble over markdown emphasis, code fences, HTML fragments,
//! and punctuation that maps to awkward pauses. [`sanitize`] removes or
//! rewrites all of it in a fixed order chosen so the function is a
//! projection: running it twice yields the same output as running it once.

use once_cell::sync::Lazy;
use regex::Regex;

/// HTML-ish tags, opening or closing. Matched after entity decoding so that
/// encoded tags (`&lt;b&gt;`) are stripped too.
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[^<>]+>").expect("valid regex"));

/// Markdown emphasis markers, code fences, and heading hashes.
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*`#]+").expect("valid regex"));

/// Any run of whitespace, collapsed to a single space at the end.
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize arbitrary assistant text into speakable plain text.
///
/// Decodes the four HTML entities (`&nbsp;`, `&lt;`, `&gt;`, `&amp;`),
/// strips tags and emphasis markers, drops bracket pairs and symbol
/// characters, rewrites colons and semicolons to commas (a comma is a
/// natural spoken pause, a colon is not), collapses whitespace, and trims.
///
/// Never fails. An empty return value means there is nothing to speak and
/// the caller must skip synthesis rather than send empty input downstream.
pub fn sanitize(raw: &str) -> String {
    // Entities first: every later rule then operates on literal characters,
    // and no rule can re-create an entity, which keeps the function
    // idempotent.
    let text = raw
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");

    let text = HTML_TAG.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            // Word separators in source form, spaces when spoken.
            '_' | '\\' | '/' => out.push(' '),
            // Bracket pairs, quotes, and operator noise carry no prosody.
            '{' | '}' | '[' | ']' | '(' | ')' | '<' | '>' | '|' => {}
            '"' | '\'' => {}
            '+' | '=' | '%' | '^' | '&' | '$' => {}
            // Unnatural TTS pauses become natural ones.
            ':' | ';' => out.push(','),
            _ => out.push(c),
        }
    }

    WHITESPACE.replace_all(&out, " ").trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
