//! Per-call mutable state.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use voxline_types::media::StartMeta;
use voxline_types::{ConversationRecord, Message};

use crate::config::SegmenterConfig;
use crate::segmenter::{Utterance, UtteranceSegmenter};

/// Where a call is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Greeting,
    /// Listening, nothing buffered.
    Idle,
    /// Listening, part of an utterance buffered.
    Capturing,
    Processing,
    Speaking,
    Closed,
}

impl CallState {
    pub fn accepts_audio(self) -> bool {
        matches!(self, Self::Idle | Self::Capturing)
    }

    fn bot_speaking(self) -> bool {
        matches!(self, Self::Greeting | Self::Processing | Self::Speaking)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Greeting => "greeting",
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Reply audio that has been sent but not yet confirmed as played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playback {
    pub mark: String,
    pub deadline: Instant,
}

/// One call's buffers, flags and transcript.
///
/// Owned by the task driving the call; never shared.
#[derive(Debug)]
pub struct CallSession {
    call_sid: String,
    stream_sid: String,
    phone_number: Option<String>,
    created_at: DateTime<Utc>,
    state: CallState,
    bot_speaking: bool,
    has_greeted: bool,
    last_response_at: Option<Instant>,
    playback: Option<Playback>,
    replies_sent: u32,
    segmenter: UtteranceSegmenter,
    messages: Vec<Message>,
}

impl CallSession {
    pub fn new(start: &StartMeta, segmenter: SegmenterConfig) -> Self {
        let phone_number = start
            .custom_parameters
            .get("from")
            .or_else(|| start.custom_parameters.get("From"))
            .filter(|n| !n.trim().is_empty())
            .cloned();

        Self {
            call_sid: start.call_sid.clone(),
            stream_sid: start.stream_sid.clone(),
            phone_number,
            created_at: Utc::now(),
            state: CallState::Greeting,
            bot_speaking: true,
            has_greeted: false,
            last_response_at: None,
            playback: None,
            replies_sent: 0,
            segmenter: UtteranceSegmenter::new(segmenter),
            messages: Vec::new(),
        }
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_bot_speaking(&self) -> bool {
        self.bot_speaking
    }

    pub fn has_greeted(&self) -> bool {
        self.has_greeted
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn playback(&self) -> Option<&Playback> {
        self.playback.as_ref()
    }

    pub fn transition(&mut self, next: CallState) {
        if self.state == CallState::Closed || self.state == next {
            return;
        }
        tracing::trace!(call_sid = %self.call_sid, from = %self.state, to = %next, "state change");
        if matches!(next, CallState::Idle | CallState::Closed) {
            self.playback = None;
        }
        self.state = next;
        self.bot_speaking = next.bot_speaking();
    }

    /// Feeds an inbound frame to the segmenter, or drops it if the bot has the floor.
    pub fn push_frame(&mut self, frame: &[u8]) -> Option<Utterance> {
        if !self.state.accepts_audio() || self.bot_speaking {
            tracing::trace!(call_sid = %self.call_sid, state = %self.state, "dropping inbound frame");
            return None;
        }
        let utterance = self.segmenter.push(frame);
        if utterance.is_some() {
            self.transition(CallState::Processing);
        } else if self.segmenter.buffered_bytes() > 0 {
            self.transition(CallState::Capturing);
        } else {
            self.transition(CallState::Idle);
        }
        utterance
    }

    /// Discards a partial utterance after an inbound lull.
    pub fn reset_partial(&mut self) -> usize {
        let dropped = self.segmenter.buffered_bytes();
        self.segmenter.reset();
        if self.state == CallState::Capturing {
            self.transition(CallState::Idle);
        }
        dropped
    }

    pub fn mark_greeted(&mut self) {
        self.has_greeted = true;
    }

    /// True when a reply went out less than `cooldown` ago.
    pub fn in_cooldown(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_response_at
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
    }

    /// Starts the reply cooldown window.
    pub fn mark_responded(&mut self, now: Instant) {
        self.last_response_at = Some(now);
    }

    /// Records that bot audio was sent and returns the mark name to await.
    pub fn begin_playback(&mut self, now: Instant, audio: Duration, slack: Duration) -> String {
        self.replies_sent += 1;
        let mark = format!("reply-{}", self.replies_sent);
        self.transition(CallState::Speaking);
        self.playback = Some(Playback {
            mark: mark.clone(),
            deadline: now + audio + slack,
        });
        mark
    }

    /// Ends playback if `mark` acknowledges the reply in flight.
    pub fn acknowledge_mark(&mut self, mark: &str) -> bool {
        match &self.playback {
            Some(p) if p.mark == mark => {
                self.transition(CallState::Idle);
                true
            }
            _ => false,
        }
    }

    pub fn record_user(&mut self, text: impl Into<String>, confidence: f32) {
        self.messages.push(Message::user(text, Some(confidence)));
    }

    pub fn record_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    pub fn replies_sent(&self) -> u32 {
        self.replies_sent
    }

    /// Closes the session and hands over its transcript.
    pub fn finish(mut self) -> ConversationRecord {
        self.transition(CallState::Closed);
        ConversationRecord {
            call_sid: self.call_sid,
            stream_sid: Some(self.stream_sid),
            phone_number: self.phone_number,
            started_at: self.created_at,
            ended_at: Utc::now(),
            messages: self.messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_ulaw, tone, FRAME_BYTES, NARROWBAND_RATE};
    use std::collections::HashMap;
    use voxline_types::media::MediaFormat;

    fn start_meta() -> StartMeta {
        let mut custom_parameters = HashMap::new();
        custom_parameters.insert("from".to_string(), "+5215550001111".to_string());
        StartMeta {
            stream_sid: "MZ1".to_string(),
            call_sid: "CA1".to_string(),
            account_sid: None,
            tracks: vec!["inbound".to_string()],
            media_format: MediaFormat::default(),
            custom_parameters,
        }
    }

    fn speech() -> Vec<u8> {
        encode_ulaw(&tone(FRAME_BYTES, NARROWBAND_RATE, 6_000.0))
    }

    #[test]
    fn new_session_starts_greeting_with_bot_speaking() {
        let session = CallSession::new(&start_meta(), SegmenterConfig::default());
        assert_eq!(session.state(), CallState::Greeting);
        assert!(session.is_bot_speaking());
        assert!(!session.has_greeted());
    }

    #[test]
    fn frames_are_dropped_unless_listening() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        assert!(session.push_frame(&speech()).is_none());
        assert_eq!(session.state(), CallState::Greeting);

        session.transition(CallState::Idle);
        session.push_frame(&speech());
        assert_eq!(session.state(), CallState::Capturing);

        let now = Instant::now();
        session.begin_playback(now, Duration::from_secs(1), Duration::ZERO);
        session.push_frame(&speech());
        assert_eq!(session.state(), CallState::Speaking);
        assert!(session.is_bot_speaking());
    }

    #[test]
    fn bot_speaking_flag_follows_state() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        for (state, speaking) in [
            (CallState::Idle, false),
            (CallState::Capturing, false),
            (CallState::Processing, true),
            (CallState::Speaking, true),
            (CallState::Idle, false),
        ] {
            session.transition(state);
            assert_eq!(session.is_bot_speaking(), speaking, "in {state}");
            assert_eq!(session.state().accepts_audio(), !speaking);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_window_is_measured_from_last_reply() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        let cooldown = Duration::from_secs(3);
        assert!(!session.in_cooldown(Instant::now(), cooldown));

        session.begin_playback(Instant::now(), Duration::from_millis(500), Duration::ZERO);
        assert!(!session.in_cooldown(Instant::now(), cooldown), "playback alone starts no cooldown");

        session.mark_responded(Instant::now());
        assert!(session.in_cooldown(Instant::now(), cooldown));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!session.in_cooldown(Instant::now(), cooldown));
    }

    #[test]
    fn only_the_current_mark_ends_playback() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        let mark = session.begin_playback(Instant::now(), Duration::from_secs(1), Duration::ZERO);
        assert_eq!(mark, "reply-1");

        assert!(!session.acknowledge_mark("reply-0"));
        assert_eq!(session.state(), CallState::Speaking);
        assert!(session.acknowledge_mark("reply-1"));
        assert_eq!(session.state(), CallState::Idle);
        assert!(session.playback().is_none());
    }

    #[test]
    fn degenerate_frames_never_open_a_capture() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        session.transition(CallState::Idle);

        for _ in 0..10 {
            assert!(session.push_frame(&[0xFF; FRAME_BYTES]).is_none());
            assert_eq!(session.state(), CallState::Idle);
        }

        session.push_frame(&speech());
        assert_eq!(session.state(), CallState::Capturing);
        assert!(!session.is_bot_speaking());

        // Degenerate frames inside a capture count as silence and keep it open.
        session.push_frame(&[0x7F; FRAME_BYTES]);
        assert_eq!(session.state(), CallState::Capturing);
    }

    #[test]
    fn reset_partial_returns_to_idle() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        session.transition(CallState::Idle);
        session.push_frame(&speech());
        assert_eq!(session.reset_partial(), FRAME_BYTES);
        assert_eq!(session.state(), CallState::Idle);
    }

    #[test]
    fn finish_produces_record() {
        let mut session = CallSession::new(&start_meta(), SegmenterConfig::default());
        session.record_assistant("Hola");
        session.record_user("Busco casa", 0.9);

        let record = session.finish();
        assert_eq!(record.call_sid, "CA1");
        assert_eq!(record.stream_sid.as_deref(), Some("MZ1"));
        assert_eq!(record.phone_number.as_deref(), Some("+5215550001111"));
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[1].confidence, Some(0.9));
        assert!(record.ended_at >= record.started_at);
    }
}
