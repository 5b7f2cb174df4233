//! Shared types for the Voxline voice bot.
//!
//! This crate provides the records that flow between the call pipeline and
//! the transcript store (message roles, conversation records, post-call
//! analysis), plus the media-stream wire events exchanged with the telephony
//! transport.
//!
//! No crate in the workspace depends on anything *except* `voxline-types` for
//! cross-cutting type definitions.

pub mod media;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who produced a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The voice bot.
    Assistant,
}

impl Role {
    /// Returns the string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored label does not map to a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} label: {value}")]
pub struct ParseLabelError {
    /// The kind of label being parsed (e.g. "role").
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

impl FromStr for Role {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParseLabelError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// One role-tagged entry in a call transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Recognition confidence in `[0, 1]`, only present for user messages.
    pub confidence: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a user message stamped with the current time.
    pub fn user(content: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }

    /// Creates an assistant message stamped with the current time.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            confidence: None,
            timestamp: Utc::now(),
        }
    }
}

/// The full record of one call, produced when the call ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub call_sid: String,
    pub stream_sid: Option<String>,
    pub phone_number: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl ConversationRecord {
    /// Call duration in seconds. Never negative.
    pub fn duration_seconds(&self) -> f64 {
        let millis = (self.ended_at - self.started_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }

    pub fn user_message_count(&self) -> usize {
        self.count_role(Role::User)
    }

    pub fn assistant_message_count(&self) -> usize {
        self.count_role(Role::Assistant)
    }

    fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Renders the conversation as plain `Role: content` lines for analysis.
    pub fn transcript_text(&self) -> String {
        let mut text = String::new();
        for message in &self.messages {
            let label = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            text.push_str(label);
            text.push_str(": ");
            text.push_str(&message.content);
            text.push('\n');
        }
        text
    }
}

/// Derived classification of a caller's purchase interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadTemperature {
    Hot,
    #[default]
    Warm,
    Cold,
}

impl LeadTemperature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }
}

impl FromStr for LeadTemperature {
    type Err = ParseLabelError;

    /// Accepts the English labels and the Spanish labels the analysis prompt
    /// may answer with (`caliente`, `tibio`, `frio`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hot" | "caliente" => Ok(Self::Hot),
            "warm" | "tibio" => Ok(Self::Warm),
            "cold" | "frio" | "frío" => Ok(Self::Cold),
            other => Err(ParseLabelError {
                kind: "lead temperature",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LeadTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall caller sentiment from post-call analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl FromStr for Sentiment {
    type Err = ParseLabelError;

    /// Only the leading word is significant, so `"positive - eager to buy"`
    /// parses as [`Sentiment::Positive`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let head = s
            .split(['-', '/', ','])
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        match head.as_str() {
            "positive" | "positivo" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" | "negativo" => Ok(Self::Negative),
            _ => Err(ParseLabelError {
                kind: "sentiment",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-call analysis of one conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallAnalysis {
    pub summary: String,
    pub sentiment: Sentiment,
    /// What the caller is looking for, in free text.
    pub customer_interest: String,
    /// Interest level on a 0-10 scale.
    pub interest_level: u8,
    pub lead_temperature: LeadTemperature,
    pub next_steps: String,
    pub mentioned_properties: String,
}
