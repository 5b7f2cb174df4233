//! Persistence operations for conversations, messages, and analyses.
//!
//! Writes go through [`save_conversation`], which inserts the conversation
//! row and every message in one transaction, and [`save_analysis`], which
//! attaches (or replaces) the post-call analysis of an existing conversation.
//!
//! Reads are [`get_conversation`] by call SID, [`list_recent`],
//! [`list_leads`] filtered by lead temperature, and the per-day aggregates of
//! [`daily_statistics`].

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use voxline_types::{CallAnalysis, ConversationRecord, LeadTemperature, Message, Role, Sentiment};

use crate::error::StoreError;

/// Default number of rows returned by list queries.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Upper bound on rows returned by list queries.
pub const MAX_LIST_LIMIT: i64 = 100;

/// A stored conversation with its transcript and optional analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredConversation {
    pub id: i64,
    pub call_sid: String,
    pub stream_sid: Option<String>,
    pub phone_number: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub total_user_messages: i64,
    pub total_assistant_messages: i64,
    pub messages: Vec<Message>,
    pub analysis: Option<CallAnalysis>,
}

/// One row of [`list_recent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub call_sid: String,
    pub phone_number: String,
    pub start_time: String,
    pub duration_seconds: f64,
    pub total_user_messages: i64,
    pub total_assistant_messages: i64,
    pub lead_temperature: Option<LeadTemperature>,
}

/// One row of [`list_leads`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadSummary {
    pub call_sid: String,
    pub phone_number: String,
    pub start_time: String,
    pub lead_temperature: LeadTemperature,
    pub interest_level: u8,
    pub summary: String,
    pub next_steps: String,
}

/// Default window, in days, for [`daily_statistics`] requests.
pub const DEFAULT_STATS_DAYS: u32 = 7;

/// Upper bound on the statistics window.
pub const MAX_STATS_DAYS: u32 = 365;

/// Conversation totals for one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStatistics {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub conversations: i64,
    pub average_duration_seconds: f64,
    pub total_user_messages: i64,
    pub hot_leads: i64,
    pub warm_leads: i64,
    pub cold_leads: i64,
    /// Conversations with no stored analysis.
    pub unanalyzed: i64,
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Clamps a caller-supplied limit into `1..=MAX_LIST_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Clamps a caller-supplied statistics window into `1..=MAX_STATS_DAYS`.
pub fn clamp_days(days: Option<u32>) -> u32 {
    days.unwrap_or(DEFAULT_STATS_DAYS).clamp(1, MAX_STATS_DAYS)
}

/// Converts a label parse failure into a column conversion error.
fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

/// Stores a finished conversation and its messages, returning the new row ID.
///
/// # Errors
///
/// Returns `StoreError::DuplicateCall` if the call SID was already stored,
/// or `StoreError::Database` on any other SQL failure. On error nothing is
/// written.
pub fn save_conversation(conn: &Connection, record: &ConversationRecord) -> Result<i64, StoreError> {
    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        "INSERT INTO conversations
            (call_sid, stream_sid, phone_number, start_time, end_time, duration_seconds,
             total_user_messages, total_assistant_messages)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.call_sid,
            record.stream_sid,
            record.phone_number.as_deref().unwrap_or("unknown"),
            format_time(&record.started_at),
            format_time(&record.ended_at),
            record.duration_seconds(),
            record.user_message_count() as i64,
            record.assistant_message_count() as i64,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(StoreError::DuplicateCall(record.call_sid.clone()));
        }
        Err(e) => return Err(e.into()),
    }

    let conversation_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO messages (conversation_id, position, role, content, confidence, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (position, message) in record.messages.iter().enumerate() {
            stmt.execute(params![
                conversation_id,
                position as i64,
                message.role.as_str(),
                message.content,
                message.confidence.map(f64::from),
                format_time(&message.timestamp),
            ])?;
        }
    }

    tx.commit()?;

    tracing::debug!(
        call_sid = %record.call_sid,
        conversation_id,
        messages = record.messages.len(),
        "stored conversation"
    );

    Ok(conversation_id)
}

/// Attaches the analysis to a stored conversation, replacing any earlier one.
///
/// # Errors
///
/// Returns `StoreError::ConversationNotFound` if `conversation_id` does not
/// exist, or `StoreError::Database` on SQL failure.
pub fn save_analysis(
    conn: &Connection,
    conversation_id: i64,
    analysis: &CallAnalysis,
) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        [conversation_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::ConversationNotFound(conversation_id));
    }

    conn.execute(
        "INSERT INTO call_analyses
            (conversation_id, summary, sentiment, customer_interest, interest_level,
             lead_temperature, next_steps, mentioned_properties)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(conversation_id) DO UPDATE SET
            summary = excluded.summary,
            sentiment = excluded.sentiment,
            customer_interest = excluded.customer_interest,
            interest_level = excluded.interest_level,
            lead_temperature = excluded.lead_temperature,
            next_steps = excluded.next_steps,
            mentioned_properties = excluded.mentioned_properties,
            analyzed_at = datetime('now')",
        params![
            conversation_id,
            analysis.summary,
            analysis.sentiment.as_str(),
            analysis.customer_interest,
            i64::from(analysis.interest_level.min(10)),
            analysis.lead_temperature.as_str(),
            analysis.next_steps,
            analysis.mentioned_properties,
        ],
    )?;

    Ok(())
}

/// Reads a conversation, its ordered messages, and its analysis by call SID.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure or if a stored label cannot
/// be parsed.
pub fn get_conversation(
    conn: &Connection,
    call_sid: &str,
) -> Result<Option<StoredConversation>, StoreError> {
    let header = conn
        .query_row(
            "SELECT id, call_sid, stream_sid, phone_number, start_time, end_time,
                    duration_seconds, total_user_messages, total_assistant_messages
             FROM conversations WHERE call_sid = ?1",
            [call_sid],
            |row| {
                Ok(StoredConversation {
                    id: row.get(0)?,
                    call_sid: row.get(1)?,
                    stream_sid: row.get(2)?,
                    phone_number: row.get(3)?,
                    start_time: row.get(4)?,
                    end_time: row.get(5)?,
                    duration_seconds: row.get(6)?,
                    total_user_messages: row.get(7)?,
                    total_assistant_messages: row.get(8)?,
                    messages: Vec::new(),
                    analysis: None,
                })
            },
        )
        .optional()?;

    let Some(mut conversation) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT role, content, confidence, timestamp
         FROM messages WHERE conversation_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map([conversation.id], message_from_row)?;
    for row in rows {
        conversation.messages.push(row?);
    }

    conversation.analysis = conn
        .query_row(
            "SELECT summary, sentiment, customer_interest, interest_level, lead_temperature,
                    next_steps, mentioned_properties
             FROM call_analyses WHERE conversation_id = ?1",
            [conversation.id],
            analysis_from_row,
        )
        .optional()?;

    Ok(Some(conversation))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(0)?;
    let role: Role = role.parse().map_err(|e| conversion_error(0, e))?;
    let confidence: Option<f64> = row.get(2)?;
    let timestamp: String = row.get(3)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| conversion_error(3, e))?
        .with_timezone(&Utc);

    Ok(Message {
        role,
        content: row.get(1)?,
        confidence: confidence.map(|c| c as f32),
        timestamp,
    })
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<CallAnalysis> {
    let sentiment: String = row.get(1)?;
    let sentiment: Sentiment = sentiment.parse().map_err(|e| conversion_error(1, e))?;
    let lead_temperature: String = row.get(4)?;
    let lead_temperature: LeadTemperature =
        lead_temperature.parse().map_err(|e| conversion_error(4, e))?;
    let interest_level: i64 = row.get(3)?;

    Ok(CallAnalysis {
        summary: row.get(0)?,
        sentiment,
        customer_interest: row.get(2)?,
        interest_level: interest_level.clamp(0, 10) as u8,
        lead_temperature,
        next_steps: row.get(5)?,
        mentioned_properties: row.get(6)?,
    })
}

/// Lists the most recent conversations, newest first.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn list_recent(conn: &Connection, limit: i64) -> Result<Vec<ConversationSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.call_sid, c.phone_number, c.start_time, c.duration_seconds,
                c.total_user_messages, c.total_assistant_messages, a.lead_temperature
         FROM conversations c
         LEFT JOIN call_analyses a ON a.conversation_id = c.id
         ORDER BY c.start_time DESC, c.id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit], |row| {
        let lead: Option<String> = row.get(7)?;
        let lead_temperature = lead
            .map(|l| l.parse::<LeadTemperature>())
            .transpose()
            .map_err(|e| conversion_error(7, e))?;
        Ok(ConversationSummary {
            id: row.get(0)?,
            call_sid: row.get(1)?,
            phone_number: row.get(2)?,
            start_time: row.get(3)?,
            duration_seconds: row.get(4)?,
            total_user_messages: row.get(5)?,
            total_assistant_messages: row.get(6)?,
            lead_temperature,
        })
    })?;

    let mut summaries = Vec::new();
    for row in rows {
        summaries.push(row?);
    }
    Ok(summaries)
}

/// Lists analysed conversations with the given lead temperature, newest first.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn list_leads(
    conn: &Connection,
    temperature: LeadTemperature,
    limit: i64,
) -> Result<Vec<LeadSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT c.call_sid, c.phone_number, c.start_time, a.interest_level, a.summary,
                a.next_steps
         FROM call_analyses a
         JOIN conversations c ON c.id = a.conversation_id
         WHERE a.lead_temperature = ?1
         ORDER BY c.start_time DESC, c.id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![temperature.as_str(), limit], |row| {
        let interest_level: i64 = row.get(3)?;
        Ok(LeadSummary {
            call_sid: row.get(0)?,
            phone_number: row.get(1)?,
            start_time: row.get(2)?,
            lead_temperature: temperature,
            interest_level: interest_level.clamp(0, 10) as u8,
            summary: row.get(4)?,
            next_steps: row.get(5)?,
        })
    })?;

    let mut leads = Vec::new();
    for row in rows {
        leads.push(row?);
    }
    Ok(leads)
}

/// Aggregates conversations that started on or after `since`, one row per
/// day, newest first. Days without calls are omitted.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure.
pub fn daily_statistics(
    conn: &Connection,
    since: NaiveDate,
) -> Result<Vec<DailyStatistics>, StoreError> {
    // start_time is RFC 3339 UTC, so its first ten characters are the day.
    let mut stmt = conn.prepare(
        "SELECT substr(c.start_time, 1, 10) AS day,
                COUNT(*),
                AVG(c.duration_seconds),
                SUM(c.total_user_messages),
                SUM(CASE WHEN a.lead_temperature = 'hot' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.lead_temperature = 'warm' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.lead_temperature = 'cold' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.id IS NULL THEN 1 ELSE 0 END)
         FROM conversations c
         LEFT JOIN call_analyses a ON a.conversation_id = c.id
         WHERE substr(c.start_time, 1, 10) >= ?1
         GROUP BY day
         ORDER BY day DESC",
    )?;

    let rows = stmt.query_map([since.format("%Y-%m-%d").to_string()], |row| {
        Ok(DailyStatistics {
            date: row.get(0)?,
            conversations: row.get(1)?,
            average_duration_seconds: row.get(2)?,
            total_user_messages: row.get(3)?,
            hot_leads: row.get(4)?,
            warm_leads: row.get(5)?,
            cold_leads: row.get(6)?,
            unanalyzed: row.get(7)?,
        })
    })?;

    let mut days = Vec::new();
    for row in rows {
        days.push(row?);
    }
    Ok(days)
}
