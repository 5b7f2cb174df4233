//! SQLite-backed transcript sink.

use crate::lifecycle::Lifecycle;
use crate::postcall::spawn_analysis;
use async_trait::async_trait;
use std::sync::Arc;
use voxline_db::DbPool;
use voxline_store::save_conversation;
use voxline_types::ConversationRecord;
use voxline_voice::{CallAnalyzer, SinkError, TranscriptSink};

/// Stores finished conversations and queues their analysis.
#[derive(Clone)]
pub struct StoreSink {
    pool: DbPool,
    analyzer: Option<Arc<dyn CallAnalyzer>>,
    lifecycle: Lifecycle,
}

impl StoreSink {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            analyzer: None,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Tracks analysis tasks on `lifecycle` so shutdown waits for them.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Runs `analyzer` on every stored conversation in the background.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn CallAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }
}

#[async_trait]
impl TranscriptSink for StoreSink {
    async fn flush(&self, record: ConversationRecord) -> Result<(), SinkError> {
        let pool = self.pool.clone();
        let (conversation_id, record) = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| SinkError::Storage(format!("db connection failed: {}", e)))?;
            let id = save_conversation(&conn, &record)
                .map_err(|e| SinkError::Storage(e.to_string()))?;
            Ok::<_, SinkError>((id, record))
        })
        .await
        .map_err(|e| SinkError::Task(e.to_string()))??;

        tracing::info!(
            call_sid = %record.call_sid,
            conversation_id,
            messages = record.messages.len(),
            "conversation stored"
        );

        if let Some(analyzer) = &self.analyzer {
            spawn_analysis(
                &self.lifecycle,
                self.pool.clone(),
                analyzer.clone(),
                conversation_id,
                record,
            );
        }
        Ok(())
    }
}
