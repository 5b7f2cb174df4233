//! Post-call analysis.
//!
//! Runs detached after a conversation is stored: the analyzer reads the
//! transcript, and the result is attached to the stored conversation.

use crate::lifecycle::Lifecycle;
use std::sync::Arc;
use voxline_db::DbPool;
use voxline_store::save_analysis;
use voxline_types::{CallAnalysis, ConversationRecord};
use voxline_voice::CallAnalyzer;

/// Analyzes `record` and stores the result against `conversation_id`.
///
/// Returns `Ok(None)` without calling out when the caller never spoke.
///
/// # Errors
///
/// Returns a description of the failing step; the caller only logs it.
pub async fn analyze_conversation(
    pool: DbPool,
    analyzer: Arc<dyn CallAnalyzer>,
    conversation_id: i64,
    record: &ConversationRecord,
) -> Result<Option<CallAnalysis>, String> {
    if record.user_message_count() == 0 {
        tracing::debug!(call_sid = %record.call_sid, "no caller speech, skipping analysis");
        return Ok(None);
    }

    let started = std::time::Instant::now();
    let analysis = analyzer
        .analyze(record)
        .await
        .map_err(|e| format!("analysis failed: {}", e))?;

    let stored = analysis.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        save_analysis(&conn, conversation_id, &stored).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("analysis task join error: {}", e))??;

    tracing::info!(
        call_sid = %record.call_sid,
        conversation_id,
        lead_temperature = %analysis.lead_temperature,
        interest_level = analysis.interest_level,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "call analysis stored"
    );
    Ok(Some(analysis))
}

/// Spawns [`analyze_conversation`] as a tracked task and logs its failure.
pub fn spawn_analysis(
    lifecycle: &Lifecycle,
    pool: DbPool,
    analyzer: Arc<dyn CallAnalyzer>,
    conversation_id: i64,
    record: ConversationRecord,
) -> tokio::task::JoinHandle<()> {
    lifecycle.spawn(async move {
        if let Err(e) = analyze_conversation(pool, analyzer, conversation_id, &record).await {
            tracing::warn!(call_sid = %record.call_sid, conversation_id, "{}", e);
        }
    })
}
