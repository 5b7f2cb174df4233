//! Conversation store for Voxline.
//!
//! Persists finished calls (conversation header plus ordered messages) and
//! their post-call analyses, and serves the read queries behind the
//! conversations, leads and statistics API.
//!
//! Every function takes a borrowed [`rusqlite::Connection`]; callers own
//! pooling and run these inside `spawn_blocking`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use voxline_store::{save_conversation, get_conversation};
//!
//! let id = save_conversation(&conn, &record)?;
//! let stored = get_conversation(&conn, &record.call_sid)?;
//! ```

mod conversations;
mod error;


pub use conversations::{
    clamp_days, clamp_limit, daily_statistics, get_conversation, list_leads, list_recent,
    save_analysis, save_conversation, ConversationSummary, DailyStatistics, LeadSummary,
    StoredConversation, DEFAULT_LIST_LIMIT, DEFAULT_STATS_DAYS, MAX_LIST_LIMIT, MAX_STATS_DAYS,
};
pub use error::StoreError;
