//! Text-to-speech synthesis and ordered playback for Viva.
//!
//! Provides a [`TtsProvider`] trait for pluggable TTS backends, with
//! [`GoogleTtsProvider`] and [`ElevenLabsProvider`] implementations, and a
//! [`PlaybackPipeline`] that speaks a sequence of text chunks strictly in
//! order with cancel-then-replace semantics.
//!
//! # Security
//!
//! - API keys come from environment variables, never config files.
//! - SSRF protection: API endpoint URL overrides are validated against
//!   private IP ranges.
//! - Synthesis requests are logged with a text hash, not the raw text.
//!
//! [`GoogleTtsProvider`]: google::GoogleTtsProvider
//! [`ElevenLabsProvider`]: elevenlabs::ElevenLabsProvider
//! [`PlaybackPipeline`]: playback::PlaybackPipeline

pub mod elevenlabs;
pub mod google;
pub mod playback;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

pub use playback::{AudioSink, PlaybackConfig, PlaybackEvent, PlaybackPipeline, SystemAudioSink};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during TTS operations.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// Input text was empty.
    #[error("text is empty")]
    EmptyText,

    /// The TTS provider API returned an error.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// HTTP request failed.
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API key was not found in environment variables.
    #[error("missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    /// URL validation failed (e.g., SSRF protection).
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    /// Local audio playback failed.
    #[error("playback error: {0}")]
    PlaybackError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Convenience alias for TTS results.
pub type TtsResult<T> = Result<T, TtsError>;

// ---------------------------------------------------------------------------
// TtsProvider trait
// ---------------------------------------------------------------------------

/// Trait for pluggable text-to-speech backends.
///
/// Each implementation handles communication with a specific TTS API and
/// returns encoded audio bytes (MP3 for both built-in providers).
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize text into audio bytes.
    ///
    /// The `voice` is a provider-specific voice ID. If `None`, the
    /// provider's default voice is used.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> TtsResult<Vec<u8>>;

    /// Return the provider name (e.g., "google", "elevenlabs").
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// TTS configuration
// ---------------------------------------------------------------------------

/// Configuration for the TTS engine.
///
/// API keys are resolved from environment variables at runtime, never stored
/// in the config itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Which provider to use ("google" or "elevenlabs").
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Environment variable name holding the API key. `None` uses the
    /// selected provider's default variable.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Voice ID override. `None` uses the provider's default voice.
    #[serde(default)]
    pub voice: Option<String>,

    /// Custom API endpoint URL override (must pass SSRF validation).
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Speech rate multiplier (Google only).
    #[serde(default = "default_speaking_rate")]
    pub speaking_rate: f64,

    /// Pitch adjustment in semitones (Google only).
    #[serde(default = "default_pitch")]
    pub pitch: f64,
}

fn default_provider() -> String {
    "google".to_string()
}

fn default_speaking_rate() -> f64 {
    1.0
}

fn default_pitch() -> f64 {
    0.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key_env: None,
            voice: None,
            endpoint_url: None,
            speaking_rate: default_speaking_rate(),
            pitch: default_pitch(),
        }
    }
}

impl TtsConfig {
    /// Resolve the API key from the environment.
    ///
    /// `default_env` is the provider's default variable name, used when the
    /// config does not name one. Returns an error if the variable is not
    /// set or is empty.
    pub fn resolve_api_key(&self, default_env: &str) -> TtsResult<String> {
        let env_name = self.api_key_env.as_deref().unwrap_or(default_env);
        match std::env::var(env_name) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(TtsError::MissingApiKey(env_name.to_string())),
        }
    }
}

/// Construct the provider named by the config.
pub fn create_provider(config: &TtsConfig) -> TtsResult<Arc<dyn TtsProvider>> {
    match config.provider.as_str() {
        "google" => Ok(Arc::new(google::GoogleTtsProvider::from_config(config)?)),
        "elevenlabs" => Ok(Arc::new(elevenlabs::ElevenLabsProvider::from_config(
            config,
        )?)),
        other => Err(TtsError::ConfigError(format!(
            "unknown TTS provider '{other}' (expected 'google' or 'elevenlabs')"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Audit hash
// ---------------------------------------------------------------------------

/// Compute a SHA-256 hex digest of the text for request logging.
///
/// The raw text never appears in logs, only this hash.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate that a URL is safe to use as an API endpoint.
///
/// Rejects:
/// - Non-HTTPS schemes (except for localhost/loopback in tests)
/// - URLs resolving to private/link-local IP ranges (not loopback)
/// - URLs with no host or empty host
pub fn validate_endpoint_url(url_str: &str) -> TtsResult<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| TtsError::InvalidEndpoint(format!("failed to parse URL: {e}")))?;

    let host = url.host_str().unwrap_or("");
    if host.is_empty() {
        return Err(TtsError::InvalidEndpoint("URL has no host".to_string()));
    }

    let is_localhost = host == "localhost" || host == "127.0.0.1" || host == "::1";

    // Require HTTPS for non-localhost URLs.
    match url.scheme() {
        "https" => {}
        "http" if is_localhost => {}
        "http" => {
            return Err(TtsError::InvalidEndpoint(
                "only HTTPS is allowed for non-localhost endpoints".to_string(),
            ));
        }
        scheme => {
            return Err(TtsError::InvalidEndpoint(format!(
                "unsupported scheme: {scheme}"
            )));
        }
    }

    // Loopback is allowed for local dev and tests; everything else is
    // checked against private/reserved ranges.
    if !is_localhost {
        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_private_ip(&ip) {
                return Err(TtsError::InvalidEndpoint(format!(
                    "endpoint resolves to private IP: {ip}"
                )));
            }
        }
    }

    Ok(url)
}

/// Check if an IP address is in a private, loopback, or link-local range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()        // 127.0.0.0/8
                || v4.is_private()   // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || v4.is_link_local() // 169.254.0.0/16
                || v4.is_broadcast() // 255.255.255.255
                || v4.is_unspecified() // 0.0.0.0
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()         // ::1
                || v6.is_unspecified() // ::
                // ULA: fc00::/7
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Text hash tests --

    #[test]
    fn text_hash_deterministic() {
        let h1 = text_hash("Hello, world!");
        let h2 = text_hash("Hello, world!");
        assert_eq!(h1, h2);
    }

    #[test]
    fn text_hash_different_inputs() {
        let h1 = text_hash("Hello");
        let h2 = text_hash("World");
        assert_ne!(h1, h2);
    }

    #[test]
    fn text_hash_is_hex_sha256() {
        let h = text_hash("test");
        assert_eq!(h.len(), 64); // SHA-256 = 32 bytes = 64 hex chars
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // -- Config tests --

    #[test]
    fn tts_config_defaults() {
        let config = TtsConfig::default();
        assert_eq!(config.provider, "google");
        assert!(config.api_key_env.is_none());
        assert!(config.voice.is_none());
        assert!(config.endpoint_url.is_none());
        assert!((config.speaking_rate - 1.0).abs() < f64::EPSILON);
        assert!(config.pitch.abs() < f64::EPSILON);
    }

    #[test]
    fn tts_config_api_key_from_default_env() {
        std::env::set_var("VIVA_TTS_KEY_TEST_A", "sk-test-key");
        let config = TtsConfig::default();
        let key = config.resolve_api_key("VIVA_TTS_KEY_TEST_A").unwrap();
        assert_eq!(key, "sk-test-key");
        std::env::remove_var("VIVA_TTS_KEY_TEST_A");
    }

    #[test]
    fn tts_config_api_key_env_override_wins() {
        std::env::set_var("VIVA_TTS_KEY_TEST_B", "override-key");
        let config = TtsConfig {
            api_key_env: Some("VIVA_TTS_KEY_TEST_B".to_string()),
            ..TtsConfig::default()
        };
        let key = config.resolve_api_key("VIVA_TTS_KEY_UNUSED").unwrap();
        assert_eq!(key, "override-key");
        std::env::remove_var("VIVA_TTS_KEY_TEST_B");
    }

    #[test]
    fn tts_config_missing_env_var() {
        let config = TtsConfig::default();
        let result = config.resolve_api_key("DEFINITELY_NOT_SET_TTS_KEY_XYZ");
        assert!(matches!(result, Err(TtsError::MissingApiKey(_))));
    }

    #[test]
    fn tts_config_empty_env_var() {
        std::env::set_var("VIVA_TTS_EMPTY_KEY_TEST", "");
        let config = TtsConfig::default();
        let result = config.resolve_api_key("VIVA_TTS_EMPTY_KEY_TEST");
        assert!(matches!(result, Err(TtsError::MissingApiKey(_))));
        std::env::remove_var("VIVA_TTS_EMPTY_KEY_TEST");
    }

    #[test]
    fn tts_config_serialization_roundtrip() {
        let config = TtsConfig {
            provider: "elevenlabs".to_string(),
            voice: Some("JBFqnCBsd6RMkjVDRZzb".to_string()),
            ..TtsConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: TtsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider, config.provider);
        assert_eq!(back.voice, config.voice);
    }

    #[test]
    fn create_provider_rejects_unknown_name() {
        let config = TtsConfig {
            provider: "acme".to_string(),
            ..TtsConfig::default()
        };
        let result = create_provider(&config);
        assert!(matches!(result, Err(TtsError::ConfigError(_))));
    }

    // -- SSRF protection tests --

    #[test]
    fn validate_endpoint_rejects_private_ips() {
        assert!(validate_endpoint_url("https://10.0.0.1/v1").is_err());
        assert!(validate_endpoint_url("https://192.168.1.1/v1").is_err());
        assert!(validate_endpoint_url("https://172.16.0.1/v1").is_err());
        assert!(validate_endpoint_url("https://169.254.169.254/v1").is_err());
        // Loopback is intentionally allowed for local dev/testing.
        assert!(validate_endpoint_url("https://127.0.0.1/v1").is_ok());
    }

    #[test]
    fn validate_endpoint_rejects_http_non_localhost() {
        assert!(validate_endpoint_url("http://texttospeech.googleapis.com/v1").is_err());
    }

    #[test]
    fn validate_endpoint_allows_https() {
        assert!(validate_endpoint_url("https://texttospeech.googleapis.com/v1").is_ok());
        assert!(validate_endpoint_url("https://api.elevenlabs.io/v1").is_ok());
    }

    #[test]
    fn validate_endpoint_allows_http_localhost() {
        assert!(validate_endpoint_url("http://localhost:8080/v1").is_ok());
        assert!(validate_endpoint_url("http://127.0.0.1:8080/v1").is_ok());
    }

    #[test]
    fn validate_endpoint_rejects_invalid_urls() {
        assert!(validate_endpoint_url("not-a-url").is_err());
        assert!(validate_endpoint_url("file:///etc/passwd").is_err());
        assert!(validate_endpoint_url("ftp://files.example.com/audio").is_err());
        assert!(validate_endpoint_url("data:text/plain,hello").is_err());
    }
}
