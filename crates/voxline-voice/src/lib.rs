//! Real-time call handling for Voxline.
//!
//! Bridges a telephony media stream to remote speech-to-text, reply
//! generation and text-to-speech services:
//!
//! - [`codec`] converts between 8 kHz μ-law and 16 kHz linear PCM.
//! - [`segmenter`] cuts the inbound frame stream into utterances.
//! - [`stage`] and [`fallback`] give every remote call a timeout, a declared
//!   fallback, and (for recognition models) an ordered list of candidates.
//! - [`session`] holds one call's mutable state.
//! - [`orchestrator`] runs the turn loop for one call.
//!
//! Remote services sit behind the [`Transcriber`], [`ReplyGenerator`],
//! [`SpeechSynthesizer`] and [`CallAnalyzer`] traits. Their clients hold no
//! per-call state and are shared across calls.

pub mod codec;
pub mod config;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod orchestrator;
pub mod recording;
pub mod segmenter;
pub mod session;
pub mod sink;
pub mod stage;
pub mod stt;
pub mod tts;

pub use codec::{decode_inbound, encode_outbound, CodecError, PcmAudio};
pub use config::{CallConfig, LlmConfig, RecordingConfig, SegmenterConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use fallback::{NoResult, OrderedFallback};
pub use llm::{parse_analysis, CallAnalyzer, GroqClient, ReplyGenerator};
pub use orchestrator::{CallServices, CallSummary, TurnOrchestrator};
pub use recording::CallRecorder;
pub use segmenter::{CloseReason, Utterance, UtteranceSegmenter};
pub use session::{CallSession, CallState};
pub use sink::{SinkError, TranscriptSink};
pub use stage::{Fallback, Stage, StageOutcome};
pub use stt::{Transcriber, Transcript, WatsonStt};
pub use tts::{SpeechSynthesizer, WatsonTts};
