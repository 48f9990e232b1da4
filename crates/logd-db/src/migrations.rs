//! Schema upgrades for the record database.
//!
//! The schema version lives in SQLite's `user_version`. Version `n` means the
//! first `n` scripts in [`SCHEMA`] have been applied; each script bumps the
//! version in the same transaction that runs it.

use rusqlite::Connection;
use thiserror::Error;

/// Upgrade scripts, oldest first. Append only.
const SCHEMA: &[&str] = &[
    include_str!("migrations/000_log_records.sql"),
    include_str!("migrations/001_log_records_indexes.sql"),
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("could not read schema version: {0}")]
    Version(#[source] rusqlite::Error),

    #[error("upgrade to schema version {version} failed: {source}")]
    Upgrade {
        version: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// The database was written by a newer build.
    #[error("schema version {found} is newer than this build supports ({supported})")]
    TooNew { found: usize, supported: usize },
}

fn schema_version(conn: &Connection) -> Result<usize, MigrationError> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(MigrationError::Version)?;
    Ok(usize::try_from(version).unwrap_or(0))
}

/// Brings the schema up to date and returns how many upgrades ran.
///
/// # Errors
///
/// Returns `MigrationError` if the version cannot be read, an upgrade
/// fails (its changes are rolled back), or the database is newer than
/// [`SCHEMA`].
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    let current = schema_version(conn)?;
    if current > SCHEMA.len() {
        return Err(MigrationError::TooNew {
            found: current,
            supported: SCHEMA.len(),
        });
    }

    for (index, script) in SCHEMA.iter().enumerate().skip(current) {
        let version = index + 1;
        let upgrade = || -> rusqlite::Result<()> {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(script)?;
            tx.pragma_update(None, "user_version", version as i64)?;
            tx.commit()
        };
        upgrade().map_err(|source| MigrationError::Upgrade { version, source })?;
        tracing::info!(version, "record schema upgraded");
    }

    Ok(SCHEMA.len() - current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), SCHEMA.len());
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA.len());
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn partially_upgraded_database_resumes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA[0]).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), SCHEMA.len() - 1);
        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'log_records'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(indexes >= 3);
    }

    #[test]
    fn newer_database_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();

        assert!(matches!(
            run_migrations(&conn),
            Err(MigrationError::TooNew { found: 99, .. })
        ));
    }
}
