//! Shared fakes for the orchestrator tests.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxline_types::media::{InboundEvent, MarkLabel, MediaChunk, MediaFormat, OutboundEvent, StartMeta};
use voxline_types::{ConversationRecord, Message};
use voxline_voice::codec::encode_ulaw;
use voxline_voice::{
    CallConfig, CallServices, ReplyGenerator, SegmenterConfig, SinkError, SpeechSynthesizer,
    Transcriber, Transcript, TranscriptSink, TurnOrchestrator, VoiceError,
};

pub const FRAME: usize = 160;

pub fn tone(samples: usize, rate: u32, amplitude: f64) -> Vec<i16> {
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

// ── events ───────────────────────────────────────────────────────────

pub fn start_event(call_sid: &str) -> InboundEvent {
    let mut custom_parameters = HashMap::new();
    custom_parameters.insert("from".to_string(), "+5215550001111".to_string());
    InboundEvent::Start {
        start: StartMeta {
            stream_sid: format!("MZ{call_sid}"),
            call_sid: call_sid.to_string(),
            account_sid: None,
            tracks: vec!["inbound".to_string()],
            media_format: MediaFormat::default(),
            custom_parameters,
        },
    }
}

pub fn media_event(frame: &[u8]) -> InboundEvent {
    InboundEvent::Media {
        media: MediaChunk {
            track: Some("inbound".to_string()),
            chunk: None,
            timestamp: None,
            payload: BASE64.encode(frame),
        },
    }
}

pub fn mark_event(name: &str) -> InboundEvent {
    InboundEvent::Mark {
        mark: MarkLabel {
            name: name.to_string(),
        },
    }
}

/// 15 speech frames then 5 quiet frames: one utterance under [`test_segmenter`].
pub fn utterance_events() -> Vec<InboundEvent> {
    let mut events: Vec<_> = (0..15).map(|_| media_event(&speech_frame())).collect();
    events.extend((0..5).map(|_| media_event(&quiet_frame())));
    events
}

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

// ── fakes ────────────────────────────────────────────────────────────

pub struct MockTranscriber {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub text: String,
    pub confidence: f32,
}

impl MockTranscriber {
    pub fn saying(text: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _pcm: &[u8], _sample_rate: u32) -> Result<Option<Transcript>, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Some(Transcript {
            text: self.text.clone(),
            confidence: self.confidence,
            model: "mock".to_string(),
        }))
    }
}

pub struct MockReplier {
    pub delay: Option<Duration>,
    pub fail: bool,
    pub reply: String,
    pub seen: Mutex<Vec<(usize, String)>>,
}

impl MockReplier {
    pub fn answering(reply: &str) -> Self {
        Self {
            delay: None,
            fail: false,
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReplyGenerator for MockReplier {
    async fn reply(&self, history: &[Message], utterance: &str) -> Result<String, VoiceError> {
        self.seen
            .lock()
            .unwrap()
            .push((history.len(), utterance.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(VoiceError::Status {
                service: "llm",
                status: 503,
                body: "over capacity".to_string(),
            });
        }
        Ok(self.reply.clone())
    }
}

pub struct MockSynthesizer {
    pub texts: Mutex<Vec<String>>,
    pub millis: u32,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl MockSynthesizer {
    pub fn new(millis: u32) -> Self {
        Self {
            texts: Mutex::new(Vec::new()),
            millis,
            delay: None,
            fail: false,
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        self.texts.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(VoiceError::Tts("voice unavailable".to_string()));
        }
        Ok(wav_tone(self.millis))
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<ConversationRecord>>,
    pub fail: bool,
}

impl MemorySink {
    pub fn records(&self) -> Vec<ConversationRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptSink for MemorySink {
    async fn flush(&self, record: ConversationRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        if self.fail {
            return Err(SinkError::Storage("disk full".to_string()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub transcriber: Arc<MockTranscriber>,
    pub replier: Arc<MockReplier>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            transcriber: Arc::new(MockTranscriber::saying("busco una casa")),
            replier: Arc::new(MockReplier::answering("Claro, ¿en qué zona?")),
            synthesizer: Arc::new(MockSynthesizer::new(500)),
            sink: Arc::new(MemorySink::default()),
        }
    }

    pub fn orchestrator(&self, call: CallConfig) -> TurnOrchestrator {
        let services = CallServices {
            transcriber: self.transcriber.clone(),
            replier: self.replier.clone(),
            synthesizer: self.synthesizer.clone(),
            sink: self.sink.clone(),
        };
        TurnOrchestrator::new(services, call, test_segmenter())
    }
}

/// A call fed event by event from the test, with its outbound side.
pub struct LiveCall {
    pub events: tokio::sync::mpsc::Sender<InboundEvent>,
    pub outbound: tokio::sync::mpsc::Receiver<OutboundEvent>,
    pub task: tokio::task::JoinHandle<Option<voxline_voice::CallSummary>>,
}

impl LiveCall {
    pub fn spawn(orchestrator: &TurnOrchestrator) -> Self {
        let (events, event_rx) = tokio::sync::mpsc::channel::<InboundEvent>(256);
        let inbound = Box::pin(futures_util::stream::unfold(event_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }));
        let (out_tx, outbound) = tokio::sync::mpsc::channel(1024);
        let orchestrator = orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.run(inbound, out_tx).await });
        Self {
            events,
            outbound,
            task,
        }
    }

    pub async fn send_all(&self, events: Vec<InboundEvent>) {
        for event in events {
            self.events.send(event).await.unwrap();
        }
    }

    /// Waits for the next playback mark and returns its name.
    pub async fn next_mark(&mut self) -> String {
        loop {
            match self.outbound.recv().await.expect("reply should be sent") {
                OutboundEvent::Mark { mark, .. } => return mark.name,
                _ => continue,
            }
        }
    }

    /// Sends `stop` and returns the summary and everything sent since the last mark.
    pub async fn stop(self) -> (Option<voxline_voice::CallSummary>, Vec<OutboundEvent>) {
        self.events.send(InboundEvent::Stop).await.unwrap();
        let summary = self.task.await.unwrap();
        (summary, drain(self.outbound).await)
    }
}

/// Drains everything the orchestrator sent.
pub async fn drain(mut rx: tokio::sync::mpsc::Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn media_count(events: &[OutboundEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, OutboundEvent::Media { .. }))
        .count()
}

pub fn marks(events: &[OutboundEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::Mark { mark, .. } => Some(mark.name.clone()),
            _ => None,
        })
        .collect()
}
