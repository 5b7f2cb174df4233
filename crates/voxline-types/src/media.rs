//! Media-stream wire events.
//!
//! The telephony transport speaks JSON text frames over a WebSocket. Inbound
//! frames carry the call lifecycle (`start`, `stop`), base64 audio (`media`)
//! and playback acknowledgements (`mark`). Outbound frames carry synthesized
//! audio, marks, and `clear` to flush queued playback.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Audio format announced by the transport in the `start` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    /// MIME-like encoding name, `audio/x-mulaw` for narrowband telephony.
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

/// Body of the `start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: MediaFormat,
    /// `<Parameter>` values forwarded from the call-setup document.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Body of the `media` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChunk {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Base64-encoded audio.
    pub payload: String,
}

/// Body of a `mark` event in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

/// Events received from the transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected,
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaChunk,
    },
    Mark {
        mark: MarkLabel,
    },
    Stop,
    /// Any event this service does not act on (e.g. `dtmf`).
    #[serde(other)]
    Unknown,
}

/// Events sent back to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Payload of an outbound `media` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded narrowband audio.
    pub payload: String,
}

impl OutboundEvent {
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkLabel { name: name.into() },
        }
    }
}
