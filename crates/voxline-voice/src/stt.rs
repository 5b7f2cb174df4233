use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

use crate::config::SttConfig;
use crate::error::VoiceError;
use crate::fallback::OrderedFallback;

/// Maximum audio input size for STT (10 MiB). Prevents oversized uploads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Best transcript for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    /// The recognition model that produced it.
    pub model: String,
}

/// Turns 16-bit little-endian PCM into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Returns `Ok(None)` when no candidate model recognized any speech.
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Option<Transcript>, VoiceError>;
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Debug, Deserialize)]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl RecognizeResponse {
    /// Joins the first alternative of each result; confidence is their mean.
    fn best(self) -> Option<(String, f32)> {
        let mut parts = Vec::new();
        let mut confidences = Vec::new();
        for result in self.results {
            if let Some(alt) = result.alternatives.into_iter().next() {
                let text = alt.transcript.trim().to_string();
                if !text.is_empty() {
                    parts.push(text);
                    confidences.extend(alt.confidence);
                }
            }
        }
        if parts.is_empty() {
            return None;
        }
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };
        Some((parts.join(" "), confidence))
    }
}

/// IBM Watson Speech to Text over the synchronous `/v1/recognize` endpoint.
#[derive(Debug, Clone)]
pub struct WatsonStt {
    client: reqwest::Client,
    url: String,
    api_key: String,
    models: OrderedFallback<String>,
}

impl WatsonStt {
    pub fn new(config: &SttConfig) -> Result<Self, VoiceError> {
        if config.models.is_empty() {
            return Err(VoiceError::Config(
                "at least one STT model is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            models: OrderedFallback::new(config.models.clone()),
        })
    }

    async fn recognize(
        &self,
        model: &str,
        pcm: &[u8],
        sample_rate: u32,
    ) -> Result<Option<(String, f32)>, VoiceError> {
        let response = self
            .client
            .post(format!("{}/v1/recognize", self.url))
            .query(&[("model", model)])
            .basic_auth("apikey", Some(&self.api_key))
            .header(CONTENT_TYPE, format!("audio/l16; rate={sample_rate}"))
            .body(pcm.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Status {
                service: "stt",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("malformed recognize response: {}", e)))?;
        Ok(parsed.best())
    }
}

#[async_trait]
impl Transcriber for WatsonStt {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Option<Transcript>, VoiceError> {
        if pcm.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                pcm.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let outcome = self
            .models
            .first_success(|model| self.recognize(model, pcm, sample_rate))
            .await;

        match outcome {
            Ok((model, (text, confidence))) => Ok(Some(Transcript {
                text,
                confidence,
                model: model.clone(),
            })),
            Err(no_result) => {
                tracing::debug!(%no_result, "no model produced a transcript");
                Ok(None)
            }
        }
    }
}
