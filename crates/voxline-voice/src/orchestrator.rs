//! The per-call turn loop.
//!
//! [`TurnOrchestrator::run`] consumes one call's inbound media-stream events
//! in arrival order and drives the session through
//! greeting → listening → transcription → reply → synthesis → playback.
//! Every remote call runs as a [`Stage`]; nothing that goes wrong inside a
//! turn ends the call. A turn in flight is polled alongside the inbound
//! stream, so media that arrives meanwhile is read and dropped by the session
//! instead of piling up behind the turn. When the stream stops or disconnects
//! the turn in flight is allowed to finish, then the transcript is flushed to
//! the [`TranscriptSink`] once.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use voxline_types::media::{InboundEvent, OutboundEvent, StartMeta};
use voxline_types::Message;

use crate::codec::{self, CodecError, PcmAudio, FRAME_BYTES, NARROWBAND_RATE, RECOGNITION_RATE};
use crate::config::{CallConfig, RecordingConfig, SegmenterConfig};
use crate::llm::ReplyGenerator;
use crate::recording::CallRecorder;
use crate::segmenter::Utterance;
use crate::session::{CallSession, CallState};
use crate::sink::TranscriptSink;
use crate::stage::Stage;
use crate::stt::{Transcriber, Transcript};
use crate::tts::SpeechSynthesizer;

/// Remote collaborators shared by every call.
#[derive(Clone)]
pub struct CallServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub replier: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<dyn TranscriptSink>,
}

/// What happened on a call, returned once the call has been torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSummary {
    pub call_sid: String,
    pub messages: usize,
    /// Bot audio playbacks, greeting included.
    pub playbacks: u32,
    pub duration_seconds: f64,
    /// Whether the transcript reached the sink.
    pub flushed: bool,
}

struct ActiveCall {
    session: CallSession,
    recorder: Option<CallRecorder>,
    media_rate: u32,
}

/// The remote half of a turn, ready to be applied to the session.
struct TurnReply {
    /// The accepted caller transcript. `None` for the greeting.
    caller: Option<Transcript>,
    text: String,
    /// μ-law reply audio. `None` when synthesis failed.
    audio: Option<Vec<u8>>,
}

type PendingTurn<'a> = BoxFuture<'a, Option<TurnReply>>;

enum Next {
    Turn(Option<TurnReply>),
    Event(Option<InboundEvent>),
    Lull,
}

impl ActiveCall {
    fn record(&mut self, frame: &[u8]) {
        if let Some(recorder) = self.recorder.as_ref() {
            if let Err(e) = recorder.write_frame(frame) {
                tracing::warn!(call_sid = %self.session.call_sid(), error = %e, "recording stopped");
                self.recorder = None;
            }
        }
    }
}

#[derive(Clone)]
pub struct TurnOrchestrator {
    services: CallServices,
    call: CallConfig,
    segmenter: SegmenterConfig,
    recording: RecordingConfig,
}

impl TurnOrchestrator {
    pub fn new(services: CallServices, call: CallConfig, segmenter: SegmenterConfig) -> Self {
        Self {
            services,
            call,
            segmenter,
            recording: RecordingConfig::default(),
        }
    }

    pub fn with_recording(mut self, recording: RecordingConfig) -> Self {
        self.recording = recording;
        self
    }

    /// Drives one call until `stop` or the end of `inbound`.
    ///
    /// Returns `None` if the stream ended before a `start` event.
    pub async fn run<S>(&self, mut inbound: S, outbound: mpsc::Sender<OutboundEvent>) -> Option<CallSummary>
    where
        S: Stream<Item = InboundEvent> + Unpin,
    {
        let mut call: Option<ActiveCall> = None;
        let mut pending: Option<PendingTurn<'_>> = None;

        loop {
            let next = match pending.as_mut() {
                Some(turn) => tokio::select! {
                    reply = turn => Next::Turn(reply),
                    event = inbound.next() => Next::Event(event),
                },
                None => {
                    let wait = self.next_wait(call.as_ref());
                    match tokio::time::timeout(wait, inbound.next()).await {
                        Ok(event) => Next::Event(event),
                        Err(_) => Next::Lull,
                    }
                }
            };

            let event = match next {
                Next::Turn(reply) => {
                    pending = None;
                    if let Some(active) = call.as_mut() {
                        self.conclude(&mut active.session, reply, &outbound).await;
                    }
                    continue;
                }
                Next::Lull => {
                    if let Some(active) = call.as_mut() {
                        self.on_quiet(&mut active.session);
                    }
                    continue;
                }
                Next::Event(None) => {
                    tracing::debug!("media stream closed");
                    break;
                }
                Next::Event(Some(event)) => event,
            };

            match event {
                InboundEvent::Connected => {
                    tracing::debug!("media stream connected");
                }
                InboundEvent::Start { start } => {
                    if let Some(active) = &call {
                        tracing::warn!(
                            call_sid = %active.session.call_sid(),
                            duplicate = %start.call_sid,
                            "ignoring second start event"
                        );
                        continue;
                    }
                    let mut active = self.open_call(&start);
                    pending = self.greet(&mut active.session);
                    call = Some(active);
                }
                InboundEvent::Media { media } => {
                    let Some(active) = call.as_mut() else {
                        tracing::trace!("media before start, ignoring");
                        continue;
                    };
                    if media.track.as_deref() == Some("outbound") {
                        continue;
                    }
                    let frame = match BASE64.decode(media.payload.as_bytes()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::debug!(call_sid = %active.session.call_sid(), error = %e, "undecodable media payload");
                            continue;
                        }
                    };
                    active.record(&frame);
                    // The session refuses audio while a turn is in flight.
                    if let Some(utterance) = active.session.push_frame(&frame) {
                        let rate = active.media_rate;
                        pending = self.begin_turn(&mut active.session, utterance, rate);
                    }
                }
                InboundEvent::Mark { mark } => {
                    if let Some(active) = call.as_mut() {
                        if active.session.acknowledge_mark(&mark.name) {
                            tracing::debug!(call_sid = %active.session.call_sid(), mark = %mark.name, "playback finished");
                        }
                    }
                }
                InboundEvent::Stop => {
                    tracing::debug!("media stream stopped");
                    break;
                }
                InboundEvent::Unknown => {
                    tracing::trace!("ignoring unknown media stream event");
                }
            }
        }

        let mut active = call?;
        if let Some(turn) = pending.take() {
            tracing::debug!(call_sid = %active.session.call_sid(), "finishing turn in flight before teardown");
            let reply = turn.await;
            self.conclude(&mut active.session, reply, &outbound).await;
        }
        Some(self.close_call(active).await)
    }

    fn open_call(&self, start: &StartMeta) -> ActiveCall {
        let session = CallSession::new(start, self.segmenter.clone());
        tracing::info!(
            call_sid = %start.call_sid,
            stream_sid = %start.stream_sid,
            encoding = %start.media_format.encoding,
            "call started"
        );

        let recorder = if self.recording.enabled {
            match CallRecorder::create(&self.recording.dir, &start.call_sid, Utc::now()) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    tracing::warn!(call_sid = %start.call_sid, error = %e, "recording disabled for call");
                    None
                }
            }
        } else {
            None
        };

        let media_rate = match start.media_format.sample_rate {
            0 => NARROWBAND_RATE,
            rate => rate,
        };

        ActiveCall {
            session,
            recorder,
            media_rate,
        }
    }

    async fn close_call(&self, active: ActiveCall) -> CallSummary {
        let ActiveCall {
            session, recorder, ..
        } = active;

        if let Some(recorder) = recorder {
            if let Err(e) = recorder.finish().await {
                tracing::warn!(call_sid = %session.call_sid(), error = %e, "failed to finalize recording");
            }
        }

        let playbacks = session.replies_sent();
        let record = session.finish();
        let call_sid = record.call_sid.clone();
        let messages = record.messages.len();
        let duration_seconds = record.duration_seconds();

        let flushed = match self.services.sink.flush(record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(call_sid = %call_sid, error = %e, "failed to flush conversation");
                false
            }
        };

        tracing::info!(call_sid = %call_sid, messages, playbacks, duration_seconds, "call ended");

        CallSummary {
            call_sid,
            messages,
            playbacks,
            duration_seconds,
            flushed,
        }
    }

    /// How long to wait for the next inbound event.
    fn next_wait(&self, call: Option<&ActiveCall>) -> Duration {
        let inactivity = self.call.inactivity_timeout();
        match call.and_then(|c| c.session.playback()) {
            Some(playback) => playback
                .deadline
                .saturating_duration_since(Instant::now())
                .min(inactivity),
            None => inactivity,
        }
    }

    /// Handles a lull in inbound events.
    fn on_quiet(&self, session: &mut CallSession) {
        if session.state() == CallState::Speaking {
            let overdue = session
                .playback()
                .is_some_and(|p| Instant::now() >= p.deadline);
            if overdue {
                tracing::debug!(call_sid = %session.call_sid(), "no playback mark, resuming listening");
                session.transition(CallState::Idle);
            }
            return;
        }
        let dropped = session.reset_partial();
        if dropped > 0 {
            tracing::debug!(call_sid = %session.call_sid(), bytes = dropped, "inbound lull, discarded partial utterance");
        }
    }

    /// Starts the greeting, if one is configured.
    fn greet(&self, session: &mut CallSession) -> Option<PendingTurn<'_>> {
        session.mark_greeted();
        let greeting = self.call.greeting.trim().to_string();
        if greeting.is_empty() {
            session.transition(CallState::Idle);
            return None;
        }
        let call_sid = session.call_sid().to_string();

        Some(
            async move {
                let audio = self.synthesize(&call_sid, &greeting).await;
                Some(TurnReply {
                    caller: None,
                    text: greeting,
                    audio,
                })
            }
            .boxed(),
        )
    }

    /// Checks a completed utterance and starts its turn.
    ///
    /// Returns `None`, with the session back to listening, when the utterance
    /// is discarded before any remote call.
    fn begin_turn(
        &self,
        session: &mut CallSession,
        utterance: Utterance,
        media_rate: u32,
    ) -> Option<PendingTurn<'_>> {
        let call_sid = session.call_sid().to_string();

        if session.in_cooldown(Instant::now(), self.call.response_cooldown()) {
            tracing::debug!(call_sid = %call_sid, bytes = utterance.audio.len(), "reply cooldown active, discarding utterance");
            session.transition(CallState::Idle);
            return None;
        }

        let pcm = match codec::decode_inbound(&utterance.audio, media_rate) {
            Ok(pcm) => pcm,
            Err(CodecError::Silence { distinct }) => {
                tracing::debug!(call_sid = %call_sid, distinct, "utterance is silence");
                session.transition(CallState::Idle);
                return None;
            }
            Err(e) => {
                tracing::warn!(call_sid = %call_sid, error = %e, "cannot decode utterance");
                session.transition(CallState::Idle);
                return None;
            }
        };

        let history = session.messages().to_vec();
        Some(self.respond(call_sid, history, pcm).boxed())
    }

    /// Transcription, reply and synthesis for one utterance.
    async fn respond(&self, call_sid: String, history: Vec<Message>, pcm: Vec<u8>) -> Option<TurnReply> {
        let mut transcript = self.transcribe(&call_sid, pcm).await?;
        let text = transcript.text.trim().to_string();
        if text.chars().count() < self.call.min_transcript_chars
            || transcript.confidence < self.call.min_confidence
        {
            tracing::debug!(
                call_sid = %call_sid,
                chars = text.chars().count(),
                confidence = transcript.confidence,
                "discarding weak transcript"
            );
            return None;
        }
        tracing::info!(call_sid = %call_sid, confidence = transcript.confidence, model = %transcript.model, "caller turn accepted");
        transcript.text = text.clone();

        let replier = Arc::clone(&self.services.replier);
        let reply = Stage::new("reply", self.call.reply_timeout())
            .with_fallback(self.call.apology.clone())
            .run(&call_sid, async move { replier.reply(&history, &text).await })
            .await
            .into_value()
            .unwrap_or_else(|| self.call.apology.clone());

        let audio = self.synthesize(&call_sid, &reply).await;
        Some(TurnReply {
            caller: Some(transcript),
            text: reply,
            audio,
        })
    }

    /// Applies a finished turn to the session and plays its audio.
    async fn conclude(
        &self,
        session: &mut CallSession,
        reply: Option<TurnReply>,
        outbound: &mpsc::Sender<OutboundEvent>,
    ) {
        let Some(TurnReply {
            caller,
            text,
            audio,
        }) = reply
        else {
            session.transition(CallState::Idle);
            return;
        };

        let greeting = caller.is_none();
        if let Some(transcript) = caller {
            session.record_user(transcript.text, transcript.confidence);
        }

        // Only replies that were actually played enter the transcript.
        let Some(ulaw) = audio else {
            session.transition(CallState::Idle);
            return;
        };
        if !self.play(session, &ulaw, outbound).await {
            return;
        }
        session.record_assistant(text);
        if !greeting {
            session.mark_responded(Instant::now());
        }
    }

    async fn transcribe(&self, call_sid: &str, pcm: Vec<u8>) -> Option<Transcript> {
        let transcriber = Arc::clone(&self.services.transcriber);
        let outcome = Stage::new("transcription", self.call.transcription_timeout())
            .run(call_sid, async move { transcriber.transcribe(&pcm, RECOGNITION_RATE).await })
            .await;

        match outcome.into_value() {
            Some(Some(transcript)) => Some(transcript),
            Some(None) => {
                tracing::debug!(call_sid, "no speech recognized");
                None
            }
            None => None,
        }
    }

    /// Synthesizes `text` into narrowband μ-law. `None` means nothing to play.
    async fn synthesize(&self, call_sid: &str, text: &str) -> Option<Vec<u8>> {
        let synthesizer = Arc::clone(&self.services.synthesizer);
        let owned = text.to_string();
        let wav = Stage::new("synthesis", self.call.synthesis_timeout())
            .run(call_sid, async move { synthesizer.synthesize(&owned).await })
            .await
            .into_value()?;

        let ulaw = match PcmAudio::from_wav(&wav).and_then(codec::encode_audio) {
            Ok(ulaw) => ulaw,
            Err(e) => {
                tracing::warn!(call_sid, error = %e, "unusable synthesized audio");
                return None;
            }
        };
        (!ulaw.is_empty()).then_some(ulaw)
    }

    /// Streams μ-law audio out followed by a playback mark. Returns whether audio was sent.
    async fn play(&self, session: &mut CallSession, ulaw: &[u8], outbound: &mpsc::Sender<OutboundEvent>) -> bool {
        let call_sid = session.call_sid().to_string();
        let stream_sid = session.stream_sid().to_string();

        for chunk in ulaw.chunks(FRAME_BYTES) {
            let event = OutboundEvent::media(stream_sid.as_str(), BASE64.encode(chunk));
            if outbound.send(event).await.is_err() {
                tracing::warn!(call_sid = %call_sid, "transport closed while sending audio");
                session.transition(CallState::Idle);
                return false;
            }
        }

        let audio = Duration::from_micros(ulaw.len() as u64 * 1_000_000 / u64::from(NARROWBAND_RATE));
        let mark = session.begin_playback(Instant::now(), audio, self.call.playback_slack());
        if outbound
            .send(OutboundEvent::mark(stream_sid.as_str(), mark))
            .await
            .is_err()
        {
            tracing::warn!(call_sid = %call_sid, "transport closed before playback mark");
            session.transition(CallState::Idle);
        }

        tracing::debug!(call_sid = %call_sid, bytes = ulaw.len(), audio_ms = audio.as_millis() as u64, "bot audio sent");
        true
    }
}
