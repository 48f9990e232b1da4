//! Storage layer for logd.
//!
//! Provides the [`LogStore`] interface the daemon persists to and queries
//! from, and a SQLite implementation of it: connection pooling (via `r2d2`),
//! WAL-mode initialization, embedded SQL migrations and per-partition
//! retention.
//!
//! # Design decisions
//!
//! - **Opaque values**: the daemon hands the store an already-encoded record
//!   and a partition key. The SQLite store decodes the record once on write
//!   to index key, level and time; queries return the stored bytes decoded.
//! - **Storage order**: queries return records in insertion order, which is
//!   the order the daemon accepted them.
//! - **Bounded partitions**: [`SqliteStore::prune`] keeps only the newest
//!   records of each partition, like a ring buffer per partition.

mod error;
mod migrations;
mod pool;
mod store;

pub use error::StoreError;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use store::{LogStore, SqliteStore, DEFAULT_QUERY_MAX_RESULTS};
