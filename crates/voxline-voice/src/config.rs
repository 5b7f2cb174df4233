use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

fn default_stt_url() -> String {
    "https://api.us-south.speech-to-text.watson.cloud.ibm.com".to_string()
}

fn default_stt_models() -> Vec<String> {
    vec![
        "es-LA_Telephony".to_string(),
        "es-MX_BroadbandModel".to_string(),
        "es-ES_BroadbandModel".to_string(),
    ]
}

fn default_tts_url() -> String {
    "https://api.us-south.text-to-speech.watson.cloud.ibm.com".to_string()
}

fn default_voice() -> String {
    "es-LA_SofiaV3Voice".to_string()
}

fn default_tts_accept() -> String {
    "audio/wav".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    150
}

fn default_analysis_max_tokens() -> u32 {
    500
}

fn default_system_prompt() -> String {
    "Eres un agente telefónico profesional y conciso. Responde en español con una o dos oraciones."
        .to_string()
}

fn default_repeat_prompt() -> String {
    "¿Podrías repetirlo por favor?".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Speech-to-text service settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Recognition models, tried in order until one returns a transcript.
    pub models: Vec<String>,
    /// HTTP request timeout, in milliseconds, for one recognition attempt.
    pub request_timeout_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: String::new(),
            models: default_stt_models(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("models", &self.models)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// Text-to-speech service settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub voice: String,
    /// `Accept` header sent with synthesis requests. Must name a WAV container.
    pub accept: String,
    pub request_timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            api_key: String::new(),
            voice: default_voice(),
            accept: default_tts_accept(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("voice", &self.voice)
            .field("accept", &self.accept)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// Chat-completion settings shared by reply generation and post-call analysis.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub analysis_max_tokens: u32,
    pub system_prompt: String,
    /// Reply used when the caller's utterance is empty.
    pub repeat_prompt: String,
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            analysis_max_tokens: default_analysis_max_tokens(),
            system_prompt: default_system_prompt(),
            repeat_prompt: default_repeat_prompt(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("analysis_max_tokens", &self.analysis_max_tokens)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish_non_exhaustive()
    }
}

/// Utterance segmentation thresholds.
///
/// Sizes are in bytes of narrowband audio (one byte per sample at 8 kHz, so
/// 8000 bytes is one second). Frame counts assume the transport's 20 ms frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// RMS amplitude (16-bit PCM scale) at or above which a frame is speech.
    pub energy_threshold: f64,
    /// Minimum buffered bytes before a pause can close an utterance (2 s).
    pub min_utterance_bytes: usize,
    /// Hard cap that closes an utterance regardless of silence (8 s).
    pub max_utterance_bytes: usize,
    /// Consecutive silent frames that mark end of speech (40 frames = 0.8 s).
    pub trailing_silence_frames: usize,
    /// Utterances with fewer distinct byte values are discarded as silence.
    pub min_distinct_bytes: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            min_utterance_bytes: 16_000,
            max_utterance_bytes: 64_000,
            trailing_silence_frames: 40,
            min_distinct_bytes: 10,
        }
    }
}

/// Turn-taking and per-stage timing for a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Spoken once when the call starts. Empty disables the greeting.
    pub greeting: String,
    /// Spoken in place of a reply when reply generation fails or times out.
    pub apology: String,
    /// Minimum gap between two spoken replies, in milliseconds.
    pub response_cooldown_ms: u64,
    /// Inbound silence after which a partial utterance is discarded, in milliseconds.
    pub inactivity_timeout_ms: u64,
    pub transcription_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    /// Extra wait past the reply's audio length before assuming playback ended.
    pub playback_slack_ms: u64,
    /// Transcripts below this confidence are discarded.
    pub min_confidence: f32,
    /// Transcripts shorter than this many characters are discarded.
    pub min_transcript_chars: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            greeting: "Hola, gracias por llamar. ¿En qué puedo ayudarte hoy?".to_string(),
            apology: "Lo siento, tuve un problema para responder. ¿Podrías repetirlo?".to_string(),
            response_cooldown_ms: 3_000,
            inactivity_timeout_ms: 5_000,
            transcription_timeout_ms: 8_000,
            reply_timeout_ms: 6_000,
            synthesis_timeout_ms: 8_000,
            playback_slack_ms: 1_500,
            min_confidence: 0.4,
            min_transcript_chars: 2,
        }
    }
}

impl CallConfig {
    pub fn response_cooldown(&self) -> Duration {
        Duration::from_millis(self.response_cooldown_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_millis(self.transcription_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn playback_slack(&self) -> Duration {
        Duration::from_millis(self.playback_slack_ms)
    }
}

/// Optional per-call recording of inbound audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("recordings"),
        }
    }
}
