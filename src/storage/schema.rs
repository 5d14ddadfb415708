//! Database schema definitions and setup

use serde::Serialize;

use super::connection::ConnectionManager;
use crate::{DatabaseError, Result};

/// Timestamp expression shared by defaults and the trigger (UTC, millisecond precision)
macro_rules! now_ms {
    () => {
        "strftime('%Y-%m-%d %H:%M:%f', 'now')"
    };
}

/// SQL to create the tags table
pub const CREATE_TAGS_TABLE: &str = concat!(
    r#"
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    identifier TEXT NOT NULL CHECK (length(identifier) > 0),
    description TEXT,
    file_path TEXT NOT NULL,
    line_number INTEGER,
    created_at TEXT NOT NULL DEFAULT ("#,
    now_ms!(),
    r#"),
    updated_at TEXT NOT NULL DEFAULT ("#,
    now_ms!(),
    r#")
)
"#
);

/// SQL to create the tag_references table
/// Edges die with either endpoint
pub const CREATE_REFERENCES_TABLE: &str = concat!(
    r#"
CREATE TABLE IF NOT EXISTS tag_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    target_tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    reference_type TEXT NOT NULL DEFAULT 'chain',
    created_at TEXT NOT NULL DEFAULT ("#,
    now_ms!(),
    r#")
)
"#
);

/// SQL to (re)install the trigger keeping `updated_at` current.
///
/// Fires on every row update, including direct writes to `updated_at`, so
/// callers can never pin the value. The new value is the later of now and
/// one millisecond past the previous value, so every update strictly
/// advances it even within the same millisecond. Recursive triggers are
/// off, so the inner UPDATE does not re-fire it. Dropped first so that a
/// file created with an older definition picks this one up on initialize.
pub const CREATE_UPDATED_AT_TRIGGER: &str = concat!(
    r#"
DROP TRIGGER IF EXISTS trg_tags_updated_at;
CREATE TRIGGER trg_tags_updated_at
AFTER UPDATE ON tags
FOR EACH ROW
BEGIN
    UPDATE tags SET updated_at = MAX("#,
    now_ms!(),
    r#", strftime('%Y-%m-%d %H:%M:%f', OLD.updated_at, '+0.001 seconds')) WHERE id = NEW.id;
END;
"#
);

/// Catalog indexes as (name, DDL)
pub const CREATE_INDEXES: &[(&str, &str)] = &[
    (
        "idx_tags_category_identifier",
        "CREATE INDEX IF NOT EXISTS idx_tags_category_identifier ON tags(category, identifier)",
    ),
    (
        "idx_tags_file_path",
        "CREATE INDEX IF NOT EXISTS idx_tags_file_path ON tags(file_path)",
    ),
    (
        "idx_references_source",
        "CREATE INDEX IF NOT EXISTS idx_references_source ON tag_references(source_tag_id)",
    ),
    (
        "idx_references_target",
        "CREATE INDEX IF NOT EXISTS idx_references_target ON tag_references(target_tag_id)",
    ),
];

/// Tables owned by the store
pub const TABLES: &[&str] = &["tags", "tag_references"];

/// All schema creation statements
pub fn all_schema_statements(create_indexes: bool) -> Vec<&'static str> {
    let mut stmts = vec![CREATE_TAGS_TABLE, CREATE_REFERENCES_TABLE];
    if create_indexes {
        stmts.extend(CREATE_INDEXES.iter().map(|(_, sql)| *sql));
    }
    stmts.push(CREATE_UPDATED_AT_TRIGGER);
    stmts
}

/// One column as reported by `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Brings a file to the expected schema and answers catalog questions.
pub struct SchemaManager<'a> {
    connections: &'a ConnectionManager,
}

impl<'a> SchemaManager<'a> {
    pub fn new(connections: &'a ConnectionManager) -> Self {
        Self { connections }
    }

    /// Create tables, optional indexes and the trigger. Safe to repeat.
    pub fn initialize(&self, create_indexes: bool) -> Result<()> {
        let conn = self.connections.get_connection()?;
        let creation_err = |source| {
            DatabaseError::classify(self.connections.path().to_path_buf(), source, |path, source| {
                DatabaseError::SchemaCreation { path, source }
            })
        };

        let tx = conn.unchecked_transaction().map_err(creation_err)?;
        for stmt in all_schema_statements(create_indexes) {
            tx.execute_batch(stmt).map_err(creation_err)?;
        }
        tx.commit().map_err(creation_err)?;

        tracing::debug!(
            path = %self.connections.path().display(),
            create_indexes,
            "schema initialized"
        );
        Ok(())
    }

    /// Column catalog of every store table
    pub fn get_schema(&self) -> Result<Vec<TableSchema>> {
        let conn = self.connections.get_connection()?;
        let mut tables = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                        not_null: row.get(3)?,
                        default_value: row.get(4)?,
                        primary_key: row.get::<_, i64>(5)? > 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if !columns.is_empty() {
                tables.push(TableSchema {
                    name: table.to_string(),
                    columns,
                });
            }
        }
        Ok(tables)
    }

    /// Names of the catalog indexes present in the file
    pub fn get_indexes(&self) -> Result<Vec<String>> {
        self.catalog_names("index")
    }

    /// Names of installed triggers
    pub fn get_triggers(&self) -> Result<Vec<String>> {
        self.catalog_names("trigger")
    }

    /// Whether both store tables exist
    pub fn is_initialized(&self) -> Result<bool> {
        let conn = self.connections.get_connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('tags', 'tag_references')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize == TABLES.len())
    }

    fn catalog_names(&self, kind: &str) -> Result<Vec<String>> {
        let conn = self.connections.get_connection()?;
        // Skips sqlite_autoindex_* entries
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND sql IS NOT NULL ORDER BY name",
        )?;
        let names = stmt
            .query_map([kind], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}
