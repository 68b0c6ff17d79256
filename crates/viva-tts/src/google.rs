//! Google Cloud Text-to-Speech provider implementation.
//!
//! Sends POST requests to `/v1/text:synthesize` and base64-decodes the
//! `audioContent` field of the JSON response into MP3 bytes. The API key is
//! resolved from the `GOOGLE_TTS_API_KEY` environment variable and rides as
//! a `key` query parameter.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{text_hash, validate_endpoint_url, TtsConfig, TtsError, TtsProvider, TtsResult};

/// Default Google TTS API base URL.
const DEFAULT_GOOGLE_TTS_BASE_URL: &str = "https://texttospeech.googleapis.com";

/// Default Google TTS voice.
pub const DEFAULT_GOOGLE_VOICE: &str = "en-US-Journey-F";

/// Environment variable name for the Google TTS API key.
pub const GOOGLE_TTS_API_KEY_ENV: &str = "GOOGLE_TTS_API_KEY";

/// Google Cloud TTS provider.
pub struct GoogleTtsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_voice: String,
    speaking_rate: f64,
    pitch: f64,
}

// -- Wire types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f64,
    pitch: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

impl GoogleTtsProvider {
    /// Create a provider from a [`TtsConfig`].
    ///
    /// Resolves the API key from the environment immediately. Returns an
    /// error if the key is missing or the endpoint URL is invalid.
    pub fn from_config(config: &TtsConfig) -> TtsResult<Self> {
        let api_key = config.resolve_api_key(GOOGLE_TTS_API_KEY_ENV)?;
        Self::new(
            api_key,
            config.endpoint_url.clone(),
            config.voice.clone(),
            config.speaking_rate,
            config.pitch,
        )
    }

    /// Create from explicit parameters (useful for testing).
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        default_voice: Option<String>,
        speaking_rate: f64,
        pitch: f64,
    ) -> TtsResult<Self> {
        let base_url = match endpoint {
            Some(url) => {
                let validated = validate_endpoint_url(&url)?;
                validated.to_string().trim_end_matches('/').to_string()
            }
            None => DEFAULT_GOOGLE_TTS_BASE_URL.to_string(),
        };

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url,
            default_voice: default_voice.unwrap_or_else(|| DEFAULT_GOOGLE_VOICE.to_string()),
            speaking_rate,
            pitch,
        })
    }

    /// Derive the BCP-47 language code from a voice name like
    /// "en-US-Journey-F".
    fn language_code(voice: &str) -> &str {
        let mut dashes = 0;
        for (i, c) in voice.char_indices() {
            if c == '-' {
                dashes += 1;
                if dashes == 2 {
                    return &voice[..i];
                }
            }
        }
        "en-US"
    }

    fn build_url(&self) -> String {
        format!("{}/v1/text:synthesize", self.base_url)
    }

    fn build_request<'a>(&'a self, text: &'a str, voice: &'a str) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: Self::language_code(voice),
                name: voice,
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3",
                speaking_rate: self.speaking_rate,
                pitch: self.pitch,
            },
        }
    }
}

#[async_trait]
impl TtsProvider for GoogleTtsProvider {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> TtsResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }

        let voice = voice.unwrap_or(&self.default_voice);
        let url = self.build_url();
        let body = self.build_request(text, voice);

        tracing::debug!(
            voice = voice,
            text_sha256 = %text_hash(text),
            text_len = text.len(),
            "sending TTS request to Google"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
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
                "Google TTS API returned {status}: {error_body}"
            )));
        }

        let parsed: SynthesizeResponse = response.json().await?;
        if parsed.audio_content.is_empty() {
            return Err(TtsError::ProviderError(
                "Google TTS response contained no audioContent".to_string(),
            ));
        }

        let audio_bytes = BASE64.decode(parsed.audio_content.as_bytes()).map_err(|e| {
            TtsError::ProviderError(format!("failed to decode audioContent base64: {e}"))
        })?;

        tracing::debug!(bytes = audio_bytes.len(), "received TTS audio from Google");

        Ok(audio_bytes)
    }

    fn name(&self) -> &str {
        "google"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(endpoint: Option<String>) -> GoogleTtsProvider {
        GoogleTtsProvider::new("g-test-key".to_string(), endpoint, None, 1.0, 0.0).unwrap()
    }

    #[test]
    fn provider_name() {
        let p = provider(Some("http://localhost:9999".to_string()));
        assert_eq!(p.name(), "google");
    }

    #[test]
    fn request_body_shape() {
        let p = provider(Some("http://localhost:9999".to_string()));
        let body = p.build_request("Hello there.", "en-US-Journey-F");
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["input"]["text"], "Hello there.");
        assert_eq!(json["voice"]["languageCode"], "en-US");
        assert_eq!(json["voice"]["name"], "en-US-Journey-F");
        assert_eq!(json["audioConfig"]["audioEncoding"], "MP3");
        assert!(json["audioConfig"]["speakingRate"].is_number());
        assert!(json["audioConfig"]["pitch"].is_number());
    }

    #[test]
    fn language_code_from_voice_name() {
        assert_eq!(GoogleTtsProvider::language_code("en-US-Journey-F"), "en-US");
        assert_eq!(GoogleTtsProvider::language_code("de-DE-Neural2-C"), "de-DE");
        // Unparseable names fall back to en-US.
        assert_eq!(GoogleTtsProvider::language_code("weird"), "en-US");
    }

    #[test]
    fn from_config_requires_api_key() {
        std::env::remove_var("VIVA_GOOGLE_TEST_MISSING_KEY");
        let config = TtsConfig {
            api_key_env: Some("VIVA_GOOGLE_TEST_MISSING_KEY".to_string()),
            ..TtsConfig::default()
        };
        let result = GoogleTtsProvider::from_config(&config);
        assert!(matches!(result, Err(TtsError::MissingApiKey(_))));
    }

    #[test]
    fn from_config_validates_endpoint() {
        std::env::set_var("VIVA_GOOGLE_ENDPOINT_TEST_KEY", "g-test-key");
        let config = TtsConfig {
            api_key_env: Some("VIVA_GOOGLE_ENDPOINT_TEST_KEY".to_string()),
            endpoint_url: Some("http://10.0.0.1/v1".to_string()),
            ..TtsConfig::default()
        };
        let result = GoogleTtsProvider::from_config(&config);
        assert!(matches!(result, Err(TtsError::InvalidEndpoint(_))));
        std::env::remove_var("VIVA_GOOGLE_ENDPOINT_TEST_KEY");
    }

    #[tokio::test]
    async fn synthesize_decodes_audio_content() {
        let mock_server = MockServer::start().await;
        let audio_bytes = vec![0xFF, 0xFB, 0x90, 0x00]; // Fake MP3 header bytes
        let encoded = BASE64.encode(&audio_bytes);

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .and(query_param("key", "g-mock-key"))
            .and(body_partial_json(serde_json::json!({
                "input": {"text": "Hello, world!"},
                "voice": {"name": "en-US-Journey-F"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"audioContent": encoded})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider =
            GoogleTtsProvider::new("g-mock-key".to_string(), Some(mock_server.uri()), None, 1.0, 0.0)
                .unwrap();

        let result = provider.synthesize("Hello, world!", None).await.unwrap();
        assert_eq!(result, audio_bytes);
    }

    #[tokio::test]
    async fn synthesize_handles_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string(r#"{"error":{"status":"PERMISSION_DENIED"}}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider =
            GoogleTtsProvider::new("g-bad-key".to_string(), Some(mock_server.uri()), None, 1.0, 0.0)
                .unwrap();

        let result = provider.synthesize("Hello", None).await;
        assert!(matches!(result, Err(TtsError::ProviderError(_))));
        if let Err(TtsError::ProviderError(msg)) = result {
            assert!(msg.contains("403"));
        }
    }

    #[tokio::test]
    async fn synthesize_rejects_missing_audio_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let provider =
            GoogleTtsProvider::new("g-mock-key".to_string(), Some(mock_server.uri()), None, 1.0, 0.0)
                .unwrap();

        let result = provider.synthesize("Hello", None).await;
        assert!(matches!(result, Err(TtsError::ProviderError(_))));
    }

    #[tokio::test]
    async fn synthesize_rejects_empty_text() {
        let provider = provider(Some("http://localhost:9999".to_string()));
        let result = provider.synthesize("   ", None).await;
        assert!(matches!(result, Err(TtsError::EmptyText)));
    }
}
