//! ElevenLabs TTS provider implementation.
//!
//! Sends POST requests to `/v1/text-to-speech/{voice_id}` and returns the
//! raw MP3 bytes. The API key is resolved from the `ELEVENLABS_API_KEY`
//! environment variable and rides in the `xi-api-key` header.
//!
//! # Security
//!
//! - Voice IDs are validated to prevent path traversal (alphanumeric +
//!   hyphens only).
//! - API endpoint overrides are SSRF-validated before use.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::{text_hash, validate_endpoint_url, TtsConfig, TtsError, TtsProvider, TtsResult};

/// Default ElevenLabs TTS API base URL.
const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

/// Default ElevenLabs voice ID (George).
pub const DEFAULT_ELEVENLABS_VOICE: &str = "JBFqnCBsd6RMkjVDRZzb";

/// ElevenLabs model ID used for all synthesis requests.
const MODEL_ID: &str = "eleven_multilingual_v2";

/// Output format query parameter (44.1 kHz 128 kbps MP3).
const OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Environment variable name for the ElevenLabs API key.
pub const ELEVENLABS_API_KEY_ENV: &str = "ELEVENLABS_API_KEY";

/// Voice ID must be alphanumeric plus hyphens only. This prevents path
/// traversal (e.g., `../../etc/passwd`) when interpolated into the URL.
fn validate_voice_id(voice_id: &str) -> TtsResult<()> {
    if voice_id.is_empty() {
        return Err(TtsError::ConfigError(
            "voice ID must not be empty".to_string(),
        ));
    }
    if voice_id.len() > 128 {
        return Err(TtsError::ConfigError(
            "voice ID exceeds maximum length of 128 characters".to_string(),
        ));
    }
    if !voice_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(TtsError::ConfigError(format!(
            "voice ID contains invalid characters (only alphanumeric and hyphens allowed): {voice_id}"
        )));
    }
    Ok(())
}

/// ElevenLabs TTS provider.
pub struct ElevenLabsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_voice: String,
}

/// Request body for the ElevenLabs TTS API.
#[derive(Debug, Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

impl ElevenLabsProvider {
    /// Create a provider from a [`TtsConfig`].
    ///
    /// Resolves the API key from the environment immediately. Returns an
    /// error if the key is missing or the endpoint URL is invalid.
    pub fn from_config(config: &TtsConfig) -> TtsResult<Self> {
        let api_key = config.resolve_api_key(ELEVENLABS_API_KEY_ENV)?;
        Self::new(api_key, config.endpoint_url.clone(), config.voice.clone())
    }

    /// Create from explicit parameters (useful for testing).
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        default_voice: Option<String>,
    ) -> TtsResult<Self> {
        let base_url = match endpoint {
            Some(url) => {
                let validated = validate_endpoint_url(&url)?;
                validated.to_string().trim_end_matches('/').to_string()
            }
            None => DEFAULT_ELEVENLABS_BASE_URL.to_string(),
        };

        let default_voice = match default_voice {
            Some(v) => {
                validate_voice_id(&v)?;
                v
            }
            None => DEFAULT_ELEVENLABS_VOICE.to_string(),
        };

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url,
            default_voice,
        })
    }

    /// Build the full API URL for a given voice ID.
    ///
    /// The voice ID is validated before being interpolated into the URL
    /// path.
    fn build_url(&self, voice_id: &str) -> TtsResult<String> {
        validate_voice_id(voice_id)?;
        Ok(format!("{}/v1/text-to-speech/{}", self.base_url, voice_id))
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsProvider {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> TtsResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }

        let voice_id = voice.unwrap_or(&self.default_voice);
        let url = self.build_url(voice_id)?;
        let body = ElevenLabsRequest {
            text,
            model_id: MODEL_ID,
        };

        tracing::debug!(
            voice = voice_id,
            text_sha256 = %text_hash(text),
            text_len = text.len(),
            "sending TTS request to ElevenLabs"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(TtsError::ProviderError(format!(
                "ElevenLabs API returned {status}: {error_body}"
            )));
        }

        let audio_bytes = response.bytes().await?.to_vec();

        tracing::debug!(
            bytes = audio_bytes.len(),
            "received TTS audio from ElevenLabs"
        );

        Ok(audio_bytes)
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
