//! AI exchange collaborator: trait and Gemini implementation.
//!
//! The wire protocol is Gemini's `generateContent`: an ordered list of
//! `{role: "user"|"model", parts: [{text}]}` entries whose first entry must
//! be user-authored, plus the new user input. [`GeminiProvider`] speaks the
//! REST endpoint directly.
//!
//! # Security
//!
//! - The API key comes from an environment variable, never config files.
//! - Endpoint URL overrides must be HTTPS and must not point at
//!   private/loopback addresses.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{DialogueError, DialogueResult};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Gemini model name.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

/// Default Gemini API endpoint.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Environment variable holding the Gemini API key.
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Reply used when the model returns no usable candidate text.
pub const NO_RESPONSE_FALLBACK: &str = "Sorry, I did not receive a proper response.";

// ---------------------------------------------------------------------------
// Exchange trait
// ---------------------------------------------------------------------------

/// Role of an outbound conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeRole {
    /// A user-authored entry (including the synthetic persona instruction).
    User,
    /// A model-authored entry.
    Model,
}

impl ExchangeRole {
    /// The wire string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeRole::User => "user",
            ExchangeRole::Model => "model",
        }
    }
}

/// One entry of the outbound conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeTurn {
    /// Entry role.
    pub role: ExchangeRole,
    /// Entry text.
    pub text: String,
}

impl ExchangeTurn {
    /// A user-authored entry.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ExchangeRole::User,
            text: text.into(),
        }
    }

    /// A model-authored entry.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ExchangeRole::Model,
            text: text.into(),
        }
    }
}

/// Trait for the AI exchange collaborator.
///
/// `history` is the ordered outbound conversation; `input` is the new user
/// text for this exchange. Implementations return the reply text.
#[async_trait]
pub trait ExchangeProvider: Send + Sync {
    /// Send the conversation and new input, returning the assistant reply.
    async fn exchange(&self, history: &[ExchangeTurn], input: &str) -> DialogueResult<String>;
}

// ---------------------------------------------------------------------------
// Gemini configuration
// ---------------------------------------------------------------------------

/// Configuration for the Gemini exchange provider.
///
/// The API key is never stored here; `api_key_env` names the environment
/// variable read at construction time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiConfig {
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Gemini model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base endpoint URL (HTTPS, public hosts only).
    #[serde(default = "default_endpoint")]
    pub endpoint_url: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Top-p nucleus sampling threshold.
    #[serde(default = "default_top_p")]
    pub top_p: f64,

    /// Top-k sampling parameter.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Maximum number of tokens to generate.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_temperature() -> f64 {
    2.0
}

fn default_top_p() -> f64 {
    0.95
}

fn default_top_k() -> u32 {
    40
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            endpoint_url: default_endpoint(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl GeminiConfig {
    /// Read the API key from the configured environment variable.
    pub fn read_api_key(&self) -> DialogueResult<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(DialogueError::ConfigError(format!(
                "environment variable '{}' not set (required for Gemini API key)",
                self.api_key_env
            ))),
        }
    }

    /// Validate that the endpoint URL is safe (HTTPS, no private hosts).
    pub fn validate_endpoint(&self) -> DialogueResult<()> {
        validate_endpoint_url(&self.endpoint_url)
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate that a URL uses HTTPS and does not point to a private or
/// loopback address, so a malicious config cannot redirect exchanges to
/// internal services.
pub fn validate_endpoint_url(url: &str) -> DialogueResult<()> {
    if !url.starts_with("https://") {
        return Err(DialogueError::ConfigError(format!(
            "exchange endpoint URL must use HTTPS, got: {url}"
        )));
    }

    let host = extract_host(url).ok_or_else(|| {
        DialogueError::ConfigError(format!("cannot parse host from endpoint URL: {url}"))
    })?;

    if is_private_or_loopback(&host) {
        return Err(DialogueError::ConfigError(format!(
            "exchange endpoint URL points to private/loopback address: {host}"
        )));
    }

    Ok(())
}

/// Extract the host portion from a URL string.
fn extract_host(url: &str) -> Option<String> {
    let after_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = after_scheme.split(['/', '?', '#']).next()?;
    let host = if let Some((h, port)) = host.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            host
        }
    } else {
        host
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Check if a hostname or IP address is private, loopback, or link-local.
fn is_private_or_loopback(host: &str) -> bool {
    if let Ok(addr) = host.parse::<std::net::Ipv4Addr>() {
        return addr.is_loopback()
            || addr.is_private()
            || addr.is_link_local()
            || addr.is_unspecified();
    }

    if let Ok(addr) = host.parse::<std::net::Ipv6Addr>() {
        return addr.is_loopback() || addr.is_unspecified();
    }

    let lower = host.to_lowercase();
    lower == "localhost"
        || lower.ends_with(".local")
        || lower.ends_with(".internal")
        || lower.ends_with(".localhost")
}

// ---------------------------------------------------------------------------
// Gemini wire types
// ---------------------------------------------------------------------------

/// Request body for the `generateContent` endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

/// A content block: role plus text parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

/// A single text part.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

/// Generation parameters, camelCase on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
}

/// Response from the `generateContent` endpoint.
#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiResponse {
    /// Text of the first candidate, if any.
    fn text_content(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let texts: Vec<&str> = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join(""))
        }
    }
}

// ---------------------------------------------------------------------------
// GeminiProvider
// ---------------------------------------------------------------------------

/// Gemini exchange provider speaking the `generateContent` REST endpoint.
pub struct GeminiProvider {
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiProvider {
    /// Create a provider from config, resolving the API key immediately.
    pub fn from_config(config: GeminiConfig) -> DialogueResult<Self> {
        config.validate_endpoint()?;
        let api_key = config.read_api_key()?;
        Ok(Self {
            client: Client::new(),
            config,
            api_key,
        })
    }

    /// Create from an explicit key (useful for testing).
    pub fn new(config: GeminiConfig, api_key: String) -> DialogueResult<Self> {
        config.validate_endpoint()?;
        Ok(Self {
            client: Client::new(),
            config,
            api_key,
        })
    }

    /// Build the request body for one exchange.
    ///
    /// The new input becomes the final user entry unless the history
    /// already ends with exactly that user turn (the caller appends the
    /// user turn to its local history before building the outbound list).
    fn build_request(&self, history: &[ExchangeTurn], input: &str) -> GeminiRequest {
        let mut contents: Vec<GeminiContent> = history
            .iter()
            .map(|turn| GeminiContent {
                role: turn.role.as_str().to_string(),
                parts: vec![GeminiPart {
                    text: turn.text.clone(),
                }],
            })
            .collect();

        let already_last = matches!(
            history.last(),
            Some(turn) if turn.role == ExchangeRole::User && turn.text == input
        );
        if !already_last {
            contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: input.to_string(),
                }],
            });
        }

        GeminiRequest {
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    /// Full URL for the configured model.
    fn build_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ExchangeProvider for GeminiProvider {
    async fn exchange(&self, history: &[ExchangeTurn], input: &str) -> DialogueResult<String> {
        // The collaborator's protocol rejects a first entry that is not
        // user-authored; fail fast instead of round-tripping a 400.
        if matches!(history.first(), Some(turn) if turn.role == ExchangeRole::Model) {
            return Err(DialogueError::ExchangeError(
                "outbound history must start with a user turn".to_string(),
            ));
        }

        let request = self.build_request(history, input);
        let url = self.build_url();

        tracing::debug!(
            model = %self.config.model,
            entries = request.contents.len(),
            "sending exchange request to Gemini"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(DialogueError::ExchangeError(format!(
                "Gemini API returned {status}: {error_body}"
            )));
        }

        let parsed: GeminiResponse = response.json().await?;
        let reply = parsed
            .text_content()
            .unwrap_or_else(|| NO_RESPONSE_FALLBACK.to_string());

        tracing::debug!(reply_len = reply.len(), "received exchange reply");
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
