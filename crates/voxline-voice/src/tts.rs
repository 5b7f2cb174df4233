use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Serialize;
use std::time::Duration;

use crate::config::TtsConfig;
use crate::error::VoiceError;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Renders reply text as speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns a WAV container holding 16-bit PCM.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

/// IBM Watson Text to Speech over `/v1/synthesize`.
#[derive(Debug, Clone)]
pub struct WatsonTts {
    client: reqwest::Client,
    url: String,
    api_key: String,
    voice: String,
    accept: String,
}

impl WatsonTts {
    pub fn new(config: &TtsConfig) -> Result<Self, VoiceError> {
        if config.voice.trim().is_empty() {
            return Err(VoiceError::Config("TTS voice must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
            accept: config.accept.clone(),
        })
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

#[async_trait]
impl SpeechSynthesizer for WatsonTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::Tts("nothing to synthesize".to_string()));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let response = self
            .client
            .post(format!("{}/v1/synthesize", self.url))
            .query(&[("voice", self.voice.as_str())])
            .basic_auth("apikey", Some(&self.api_key))
            .header(ACCEPT, &self.accept)
            .json(&SynthesizeRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Status {
                service: "tts",
                status: status.as_u16(),
                body,
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(VoiceError::Tts("service returned empty audio".to_string()));
        }
        tracing::debug!(voice = %self.voice, bytes = audio.len(), "synthesized reply");
        Ok(audio.to_vec())
    }
}
