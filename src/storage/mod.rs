//! Storage Layer - SQLite-backed persistence
//!
//! System of record is a single SQLite file with tables:
//! - tags(id, category, identifier, description, file_path, line_number, created_at, updated_at)
//! - tag_references(id, source_tag_id, target_tag_id, reference_type, created_at)
//!
//! Each thread gets its own connection, owned by the manager; WAL mode lets
//! readers run while one writer at a time holds the write lock.

pub mod batch;
pub mod connection;
pub mod perf;
pub mod schema;
pub mod store;
pub mod transaction;

pub use batch::BatchInserter;
pub use connection::{ConnectionHandle, ConnectionManager};
pub use schema::{ColumnInfo, SchemaManager, TableSchema};
pub use store::{StoreStats, TagStore};
pub use transaction::TransactionScope;

/// Initialized store in a fresh temporary directory
#[cfg(test)]
pub(crate) fn test_store() -> (tempfile::TempDir, TagStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = TagStore::open_path(&dir.path().join("tags.db")).unwrap();
    (dir, store)
}
