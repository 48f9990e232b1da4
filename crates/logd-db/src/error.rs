//! Error types for the storage layer.

use crate::migrations::MigrationError;
use crate::pool::PoolError;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to check out a pooled connection.
    #[error("store connection error: {0}")]
    Connection(#[from] r2d2::Error),

    /// A SQL statement failed.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored or submitted record could not be decoded.
    #[error("store decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Opening the store failed while creating the pool.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Opening the store failed while applying migrations.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
