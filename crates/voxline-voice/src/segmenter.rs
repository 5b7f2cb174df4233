//! Energy-based utterance segmentation.
//!
//! The segmenter is fed inbound μ-law frames one at a time and returns a
//! finished [`Utterance`] when either the caller pauses long enough after
//! speaking or the buffer hits its hard size cap.

use crate::codec::{decode_ulaw, distinct_bytes, is_degenerate, rms};
use crate::config::SegmenterConfig;

/// How a single frame was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Every byte identical. Counted as silence, not buffered.
    Degenerate,
    Silent,
    Speech,
}

/// Why an utterance was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TrailingSilence,
    MaxLength,
}

/// One completed span of caller audio (narrowband μ-law).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub audio: Vec<u8>,
    pub reason: CloseReason,
}

#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    buffer: Vec<u8>,
    silent_frames: usize,
    speech_observed: bool,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let capacity = config.max_utterance_bytes;
        Self {
            config,
            buffer: Vec::with_capacity(capacity),
            silent_frames: 0,
            speech_observed: false,
        }
    }

    pub fn classify(&self, frame: &[u8]) -> FrameClass {
        if is_degenerate(frame) {
            return FrameClass::Degenerate;
        }
        if rms(&decode_ulaw(frame)) >= self.config.energy_threshold {
            FrameClass::Speech
        } else {
            FrameClass::Silent
        }
    }

    /// Feeds one frame. Returns an utterance when this frame completes one.
    pub fn push(&mut self, frame: &[u8]) -> Option<Utterance> {
        match self.classify(frame) {
            FrameClass::Degenerate => {
                self.silent_frames += 1;
            }
            FrameClass::Silent => {
                self.silent_frames += 1;
                self.buffer.extend_from_slice(frame);
            }
            FrameClass::Speech => {
                self.silent_frames = 0;
                self.speech_observed = true;
                self.buffer.extend_from_slice(frame);
            }
        }

        let reason = if self.buffer.len() >= self.config.min_utterance_bytes
            && self.speech_observed
            && self.silent_frames >= self.config.trailing_silence_frames
        {
            CloseReason::TrailingSilence
        } else if self.buffer.len() >= self.config.max_utterance_bytes {
            if !self.speech_observed {
                tracing::trace!(bytes = self.buffer.len(), "dropping capped buffer without speech");
                self.reset();
                return None;
            }
            CloseReason::MaxLength
        } else {
            return None;
        };

        let audio = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.max_utterance_bytes),
        );
        self.silent_frames = 0;
        self.speech_observed = false;

        let distinct = distinct_bytes(&audio);
        if distinct < self.config.min_distinct_bytes {
            tracing::debug!(bytes = audio.len(), distinct, "discarding near-silent utterance");
            return None;
        }

        tracing::debug!(bytes = audio.len(), ?reason, "utterance complete");
        Some(Utterance { audio, reason })
    }

    /// Drops any partially accumulated audio.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.silent_frames = 0;
        self.speech_observed = false;
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn speech_observed(&self) -> bool {
        self.speech_observed
    }
}
