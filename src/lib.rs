//! # Tagtrace - Tag Traceability Store
//!
//! Transactional, thread-safe persistence for traceability tags
//! (requirements, designs, tasks, tests, ...) and the reference chains
//! between them.
//!
//! Tagtrace provides:
//! - A closed tag category set validated before any write
//! - Per-thread SQLite connections in WAL mode with bounded lock waits
//! - Idempotent schema setup with cascade deletes and an `updated_at` trigger
//! - Indexed search over tags and references
//! - Transaction scopes and batched multi-row inserts

pub mod config;
pub mod storage;
pub mod tag;

// Re-exports for convenient access
pub use config::StoreConfig;
pub use storage::{
    BatchInserter, ConnectionHandle, ConnectionManager, SchemaManager, StoreStats, TagStore, TransactionScope,
};
pub use tag::{NewTag, Reference, Tag, TagCategory, TagQuery, TagUpdate};

use std::path::PathBuf;

/// Result type alias for Tagtrace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Tagtrace operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(DatabaseError::Sqlite(err))
    }
}

impl Error {
    /// True for business-rule failures raised before any I/O
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Business-rule violations. Always raised before touching storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid tag category '{0}'")]
    InvalidCategory(String),

    #[error("empty identifier for {category} tag")]
    EmptyIdentifier { category: String },

    #[error("missing file_path for tag '{identifier}'")]
    MissingFilePath { identifier: String },
}

/// Failures of the backing SQLite file.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema creation failed for {}: {source}", path.display())]
    SchemaCreation {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database file {} is corrupted: {source}", path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl DatabaseError {
    /// Classify a failure on `path`: corruption is reported as such,
    /// everything else through `fallback`.
    pub(crate) fn classify(
        path: PathBuf,
        source: rusqlite::Error,
        fallback: fn(PathBuf, rusqlite::Error) -> DatabaseError,
    ) -> Self {
        if is_corruption(&source) {
            DatabaseError::Corrupted { path, source }
        } else {
            fallback(path, source)
        }
    }

    /// True when SQLite gave up waiting for a lock
    pub fn is_busy(&self) -> bool {
        let source = match self {
            DatabaseError::Open { source, .. }
            | DatabaseError::SchemaCreation { source, .. }
            | DatabaseError::Corrupted { source, .. }
            | DatabaseError::Sqlite(source) => source,
        };
        matches!(
            source.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase)
    )
}

/// A transaction scope was rolled back because of a business-rule failure.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("rolled back: {0}")]
    RolledBack(#[source] ValidationError),
}
