//! SQLite connection pool for the record store.
//!
//! Records are appended by one dispatcher and read by short query tasks, so
//! file databases run in WAL mode: readers never wait on the writer.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use thiserror::Error;

/// Path that selects a private in-memory database.
pub(crate) const IN_MEMORY: &str = ":memory:";

/// Connection tunables, filled from the daemon's `[database]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
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

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("could not open record database: {0}")]
    Open(#[from] r2d2::Error),
}

/// Applies the per-connection pragmas.
///
/// A file database must accept WAL; an in-memory one reports `memory`.
fn prepare(conn: &mut Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !matches!(mode.as_str(), "wal" | "memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode stayed {mode}, WAL required")),
        ));
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
}

/// Opens a pool over the database at `path`.
///
/// `:memory:` gives each connection its own database, so such a pool holds
/// exactly one connection whatever `pool_max_size` says.
///
/// # Errors
///
/// Returns `PoolError::Open` if the first connection cannot be opened or
/// prepared.
pub fn create_pool(path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let in_memory = path == IN_MEMORY;
    let manager = if in_memory {
        SqliteConnectionManager::memory()
    } else {
        SqliteConnectionManager::file(path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
    };
    let manager = manager.with_init(move |conn| prepare(conn, settings));

    let size = if in_memory { 1 } else { settings.pool_max_size.max(1) };
    let pool = Pool::builder().max_size(size).build(manager)?;
    tracing::debug!(path, connections = size, "record database opened");
    Ok(pool)
}
