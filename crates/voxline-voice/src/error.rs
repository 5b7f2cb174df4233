use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Audio error: {0}")]
    Audio(#[from] CodecError),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Stage task failed: {0}")]
    Task(String),
}
