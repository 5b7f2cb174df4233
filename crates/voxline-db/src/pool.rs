//! Connection pool creation and startup initialization.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use thiserror::Error;

use crate::migrations::{run_migrations, MigrationError};

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating or initializing the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),

    /// Failed to apply migrations on the freshly created pool.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// Every pooled connection opens its own handle to `db_path`, so `:memory:`
/// would give each connection a separate empty database. Tests use a
/// temporary file instead.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| configure_connection(conn, settings));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        max_size = settings.pool_max_size,
        "database pool ready"
    );
    Ok(pool)
}

/// Per-connection pragmas: WAL journal, enforced foreign keys, busy timeout.
///
/// Transcript writes happen once per call, so `synchronous = NORMAL` is
/// durable enough under WAL.
fn configure_connection(conn: &mut Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    // In-memory databases report "memory".
    if !matches!(journal_mode.as_str(), "wal" | "memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal mode stayed {}", journal_mode)),
        ));
    }
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )
}

/// Creates the pool and applies pending migrations in one step.
///
/// # Errors
///
/// Returns `PoolError` if the pool cannot be built, a connection cannot be
/// checked out, or a migration fails.
pub fn init_database(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let pool = create_pool(db_path, settings)?;
    let conn = pool.get()?;
    let applied = run_migrations(&conn)?;
    if applied > 0 {
        tracing::info!(count = applied, path = db_path, "applied database migrations");
    }
    drop(conn);
    Ok(pool)
}
