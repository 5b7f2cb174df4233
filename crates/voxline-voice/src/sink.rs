use async_trait::async_trait;
use thiserror::Error;
use voxline_types::ConversationRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("conversation storage failed: {0}")]
    Storage(String),

    #[error("sink task failed: {0}")]
    Task(String),
}

/// Durable destination for finished conversations.
///
/// The orchestrator calls [`flush`](TranscriptSink::flush) exactly once per
/// call, at teardown. Errors are logged by the caller and never fail the call.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn flush(&self, record: ConversationRecord) -> Result<(), SinkError>;
}
