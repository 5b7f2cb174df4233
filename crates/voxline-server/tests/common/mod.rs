//! Shared setup for the server integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use voxline_db::{init_database, DbPool, DbRuntimeSettings};
use voxline_server::lifecycle::Lifecycle;
use voxline_server::registry::CallRegistry;
use voxline_server::sink::StoreSink;
use voxline_server::AppState;
use voxline_types::{CallAnalysis, ConversationRecord, LeadTemperature, Message, Sentiment};
use voxline_voice::codec::encode_ulaw;
use voxline_voice::{
    CallAnalyzer, CallConfig, CallServices, ReplyGenerator, SegmenterConfig, SpeechSynthesizer,
    Transcriber, Transcript, TurnOrchestrator, VoiceError,
};

/// Creates a migrated database in a temporary directory. Keep the
/// `TempDir` alive for as long as the pool is used.
pub fn test_pool() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voxline-test.db");
    let pool = init_database(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    (dir, pool)
}

pub fn sample_record(call_sid: &str) -> ConversationRecord {
    let started_at = chrono::Utc::now() - chrono::Duration::seconds(30);
    ConversationRecord {
        call_sid: call_sid.to_string(),
        stream_sid: Some(format!("MZ{call_sid}")),
        phone_number: Some("+5215550001111".to_string()),
        started_at,
        ended_at: started_at + chrono::Duration::seconds(30),
        messages: vec![
            Message::assistant("Hola, ¿en qué te ayudo?"),
            Message::user("Busco un departamento", Some(0.91)),
            Message::assistant("¿En qué zona?"),
        ],
    }
}

pub fn hot_lead() -> CallAnalysis {
    CallAnalysis {
        summary: "Busca departamento de dos recámaras".to_string(),
        sentiment: Sentiment::Positive,
        customer_interest: "Departamento en la Roma".to_string(),
        interest_level: 8,
        lead_temperature: LeadTemperature::Hot,
        next_steps: "Agendar visita".to_string(),
        mentioned_properties: "Torre Norte".to_string(),
    }
}

// ── audio ────────────────────────────────────────────────────────────

pub const FRAME: usize = 160;

fn tone(samples: usize, rate: u32, amplitude: f64) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / f64::from(rate);
            (amplitude * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}

pub fn speech_frame() -> Vec<u8> {
    encode_ulaw(&tone(FRAME, 8_000, 6_000.0))
}

pub fn quiet_frame() -> Vec<u8> {
    let samples: Vec<i16> = (0..FRAME).map(|i| ((i * 7) % 61) as i16 - 30).collect();
    encode_ulaw(&samples)
}

pub fn wav_tone(millis: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in tone((16 * millis) as usize, 16_000, 5_000.0) {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

// ── fakes ────────────────────────────────────────────────────────────

pub struct FixedTranscriber(pub &'static str);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _pcm: &[u8], _rate: u32) -> Result<Option<Transcript>, VoiceError> {
        Ok(Some(Transcript {
            text: self.0.to_string(),
            confidence: 0.9,
            model: "fixed".to_string(),
        }))
    }
}

pub struct FixedReplier(pub &'static str);

#[async_trait]
impl ReplyGenerator for FixedReplier {
    async fn reply(&self, _history: &[Message], _utterance: &str) -> Result<String, VoiceError> {
        Ok(self.0.to_string())
    }
}

/// Answers every request with `millis` of 16 kHz tone.
pub struct ToneSynthesizer(pub u32);

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
        Ok(wav_tone(self.0))
    }
}

pub struct FixedAnalyzer {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FixedAnalyzer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallAnalyzer for FixedAnalyzer {
    async fn analyze(&self, _record: &ConversationRecord) -> Result<CallAnalysis, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(VoiceError::Llm("model unavailable".to_string()));
        }
        Ok(hot_lead())
    }
}

// ── state ────────────────────────────────────────────────────────────

pub fn test_segmenter() -> SegmenterConfig {
    SegmenterConfig {
        min_utterance_bytes: 1_600,
        trailing_silence_frames: 5,
        ..SegmenterConfig::default()
    }
}

pub fn test_call_config() -> CallConfig {
    CallConfig {
        greeting: String::new(),
        transcription_timeout_ms: 2_000,
        reply_timeout_ms: 2_000,
        synthesis_timeout_ms: 2_000,
        ..CallConfig::default()
    }
}

pub fn test_state(pool: DbPool, analyzer: Arc<FixedAnalyzer>) -> AppState {
    let lifecycle = Lifecycle::new();
    let sink = StoreSink::new(pool.clone())
        .with_analyzer(analyzer)
        .with_lifecycle(lifecycle.clone());
    let services = CallServices {
        transcriber: Arc::new(FixedTranscriber("busco un departamento")),
        replier: Arc::new(FixedReplier("Claro, ¿en qué zona?")),
        synthesizer: Arc::new(ToneSynthesizer(200)),
        sink: Arc::new(sink),
    };
    AppState {
        pool,
        orchestrator: TurnOrchestrator::new(services, test_call_config(), test_segmenter()),
        registry: CallRegistry::new(),
        public_host: None,
        lifecycle,
    }
}

/// Polls `check` every 20 ms until it returns `Some` or two seconds pass.
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..100 {
        if let Some(value) = check() {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}
