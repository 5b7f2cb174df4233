//! Database layer for Voxline.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations for the conversation store. Every table is
//! created through versioned migrations managed by this crate.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, init_database, DbPool, DbRuntimeSettings, PoolError};
