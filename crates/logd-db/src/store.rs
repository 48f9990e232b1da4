//! The `LogStore` interface and its SQLite implementation.
//!
//! Writes go through [`LogStore::write`], which receives the partition key
//! and the encoded record. Reads go through [`LogStore::query`], which
//! filters by time range, level and key prefix and paginates with
//! offset/limit in storage order.

use logd_types::{timestamp_nanos, LogRecord, QueryParams};
use prost::Message;
use rusqlite::{params, types::ToSql};

use crate::error::StoreError;
use crate::migrations::run_migrations;
use crate::pool::{create_pool, DbPool, DbRuntimeSettings};

/// Result cap applied when a query sets no limit.
pub const DEFAULT_QUERY_MAX_RESULTS: u32 = 10_000;

/// Persistent log storage consumed by the daemon.
pub trait LogStore: Send + Sync {
    /// Persists an encoded record under a partition key.
    fn write(&self, partition_key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Returns the records matching `params`, oldest first.
    fn query(&self, params: &QueryParams) -> Result<Vec<LogRecord>, StoreError>;

    /// Total number of records held.
    fn len(&self) -> Result<u64, StoreError>;

    /// Returns `true` if the store holds no records.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// SQLite-backed [`LogStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    max_results: u32,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the pool cannot be built or a migration fails.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, StoreError> {
        let pool = create_pool(path, settings)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                tracing::info!(count = applied, path, "applied store migrations");
            }
        }
        Ok(Self::from_pool(pool))
    }

    /// Wraps an already-migrated pool.
    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            pool,
            max_results: DEFAULT_QUERY_MAX_RESULTS,
        }
    }

    /// Caps the number of records a single query may return.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Deletes the oldest records of every partition holding more than
    /// `keep_per_partition` records. Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on connection or SQL failure.
    pub fn prune(&self, keep_per_partition: u64) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let keep = i64::try_from(keep_per_partition).unwrap_or(i64::MAX);
        let deleted = conn.execute(
            "DELETE FROM log_records WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY partition_key ORDER BY id DESC
                    ) AS rn
                    FROM log_records
                ) WHERE rn > ?1
            )",
            params![keep],
        )?;
        Ok(deleted)
    }
}

impl LogStore for SqliteStore {
    fn write(&self, partition_key: &str, value: &[u8]) -> Result<(), StoreError> {
        let record = LogRecord::decode(value)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO log_records (partition_key, record_key, level, ts_nanos, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                partition_key,
                record.key,
                record.level,
                record.timestamp_nanos(),
                value,
            ],
        )?;
        Ok(())
    }

    fn query(&self, filter: &QueryParams) -> Result<Vec<LogRecord>, StoreError> {
        // Clauses and bind parameters are collected separately so nothing
        // from the filter is interpolated into the SQL text.
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref start) = filter.time_start {
            values.push(Box::new(timestamp_nanos(start)));
            clauses.push(format!("ts_nanos >= ?{}", values.len()));
        }
        if let Some(ref end) = filter.time_end {
            values.push(Box::new(timestamp_nanos(end)));
            clauses.push(format!("ts_nanos <= ?{}", values.len()));
        }
        if let Some(level) = filter.level {
            values.push(Box::new(level));
            clauses.push(format!("level = ?{}", values.len()));
        }
        if let Some(ref prefix) = filter.key_prefix {
            values.push(Box::new(prefix.clone()));
            let idx = values.len();
            clauses.push(format!("substr(record_key, 1, length(?{idx})) = ?{idx}"));
        }

        let limit = filter
            .limit
            .map_or(self.max_results, |l| l.min(self.max_results));
        values.push(Box::new(limit));
        let limit_idx = values.len();
        values.push(Box::new(filter.offset.unwrap_or(0)));
        let offset_idx = values.len();

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT body FROM log_records {where_clause}
             ORDER BY id ASC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let bound: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let bodies = stmt
            .query_map(bound.as_slice(), |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| LogRecord::decode(body.as_slice()).map_err(StoreError::from))
            .collect()
    }

    fn len(&self) -> Result<u64, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM log_records", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
