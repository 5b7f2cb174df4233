//! Error types for the conversation store.

/// Errors that can occur during conversation store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A conversation with this call SID has already been stored.
    #[error("conversation already stored for call {0}")]
    DuplicateCall(String),

    /// No conversation exists with the given ID.
    #[error("conversation {0} not found")]
    ConversationNotFound(i64),
}
