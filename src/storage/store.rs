//! Tag and reference CRUD and search

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{OptionalExtension, ToSql, params, params_from_iter};
use serde::Serialize;

use super::connection::ConnectionManager;
use super::perf::{PerfFields, timed};
use super::schema::SchemaManager;
use super::transaction::with_savepoint;
use crate::config::StoreConfig;
use crate::tag::{DEFAULT_REFERENCE_TYPE, NewTag, Reference, Tag, TagCategory, TagQuery, TagUpdate};
use crate::{Result, ValidationError};

/// Rows per multi-row INSERT statement (5 bound values each)
const BULK_INSERT_CHUNK_ROWS: usize = 200;

macro_rules! select_tags {
    ($($tail:literal)?) => {
        concat!(
            "SELECT id, category, identifier, description, file_path, line_number, created_at, updated_at FROM tags ",
            $($tail)?
        )
    };
}

macro_rules! select_references {
    ($($tail:literal)?) => {
        concat!(
            "SELECT id, source_tag_id, target_tag_id, reference_type, created_at FROM tag_references ",
            $($tail)?
        )
    };
}

impl ToSql for TagCategory {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TagCategory {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_str()?;
        code.parse()
            .map_err(|_| FromSqlError::Other(Box::new(ValidationError::InvalidCategory(code.to_string()))))
    }
}

/// SQLite-backed tag store.
///
/// Cheap to share between threads (`Arc<TagStore>` or scoped borrows);
/// every thread talks to the file through its own connection. The store
/// does not create its schema on its own: use [`TagStore::open`] or call
/// [`SchemaManager::initialize`] first.
#[derive(Debug)]
pub struct TagStore {
    connections: ConnectionManager,
}

impl TagStore {
    /// Wrap a configuration without touching the file
    pub fn new(config: StoreConfig) -> Self {
        Self {
            connections: ConnectionManager::new(config),
        }
    }

    /// Open a store and bring its file to the current schema
    pub fn open(config: StoreConfig) -> Result<Self> {
        let create_indexes = config.create_indexes;
        let store = Self::new(config);
        store.schema().initialize(create_indexes)?;
        Ok(store)
    }

    /// Open the database file at `path` with default tuning
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(StoreConfig::for_path(path))
    }

    pub fn schema(&self) -> SchemaManager<'_> {
        SchemaManager::new(&self.connections)
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Release the calling thread's connection
    pub fn close(&self) {
        self.connections.close();
    }

    // ========== Tag Operations ==========

    /// Validate and insert one tag, returning its id
    pub fn insert_tag(&self, tag: &NewTag) -> Result<i64> {
        timed("insert_tag", PerfFields::tag(&tag.category, &tag.identifier), || {
            let category = tag.validate()?;
            let conn = self.connections.get_connection()?;
            let mut stmt = conn.prepare_cached(
                "INSERT INTO tags (category, identifier, description, file_path, line_number) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let id = stmt.insert(params![
                category,
                tag.identifier,
                tag.description,
                tag.file_path,
                tag.line_number,
            ])?;
            Ok(id)
        })
    }

    /// Get a tag by id
    pub fn get_tag_by_id(&self, id: i64) -> Result<Option<Tag>> {
        let conn = self.connections.get_connection()?;
        let mut stmt = conn.prepare_cached(select_tags!("WHERE id = ?1"))?;
        let tag = stmt.query_row([id], row_to_tag).optional()?;
        Ok(tag)
    }

    /// Look a tag up by its natural key. The first match by id wins.
    pub fn find_tag(&self, category: TagCategory, identifier: &str) -> Result<Option<Tag>> {
        let conn = self.connections.get_connection()?;
        let mut stmt = conn.prepare_cached(select_tags!(
            "WHERE category = ?1 AND identifier = ?2 ORDER BY id LIMIT 1"
        ))?;
        let tag = stmt.query_row(params![category, identifier], row_to_tag).optional()?;
        Ok(tag)
    }

    /// All tags of one category, by identifier
    pub fn search_tags_by_category(&self, category: TagCategory) -> Result<Vec<Tag>> {
        self.query_tags(
            select_tags!("WHERE category = ?1 ORDER BY identifier, id"),
            [category],
        )
    }

    /// Exact identifier match across categories
    pub fn search_tags_by_identifier(&self, identifier: &str) -> Result<Vec<Tag>> {
        self.query_tags(
            select_tags!("WHERE identifier = ?1 ORDER BY category, id"),
            [identifier],
        )
    }

    /// All tags found in one file, by line
    pub fn search_tags_by_file(&self, file_path: &str) -> Result<Vec<Tag>> {
        self.query_tags(
            select_tags!("WHERE file_path = ?1 ORDER BY line_number, id"),
            [file_path],
        )
    }

    /// Identifier substring match (ASCII case-insensitive), by identifier
    pub fn search_tags_by_pattern(&self, substring: &str) -> Result<Vec<Tag>> {
        let pattern = format!("%{}%", escape_like(substring));
        self.query_tags(
            select_tags!(r"WHERE identifier LIKE ?1 ESCAPE '\' ORDER BY identifier, id"),
            [pattern],
        )
    }

    /// Tags with `start <= line_number <= end`, by line then file
    pub fn search_tags_by_line_range(&self, start: u32, end: u32) -> Result<Vec<Tag>> {
        self.query_tags(
            select_tags!("WHERE line_number BETWEEN ?1 AND ?2 ORDER BY line_number, file_path, id"),
            [start, end],
        )
    }

    /// Conjunctive search; an empty query returns every tag.
    /// Results are ordered by category, then identifier.
    pub fn complex_search(&self, query: &TagQuery) -> Result<Vec<Tag>> {
        timed("complex_search", PerfFields::default(), || {
            let mut clauses: Vec<&str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(category) = query.category {
                clauses.push("category = ?");
                values.push(Value::Text(category.as_str().to_string()));
            }
            if let Some(pattern) = &query.file_pattern {
                clauses.push(r"file_path LIKE ? ESCAPE '\'");
                values.push(Value::Text(glob_to_like(pattern)));
            }
            if let Some((start, end)) = query.line_range {
                clauses.push("line_number BETWEEN ? AND ?");
                values.push(Value::Integer(start.into()));
                values.push(Value::Integer(end.into()));
            }

            let filter = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {} ", clauses.join(" AND "))
            };
            let sql = format!("{}{}ORDER BY category, identifier, id", select_tags!(), filter);
            self.query_tags(&sql, params_from_iter(values))
        })
    }

    /// Every tag, by category then identifier
    pub fn get_all_tags(&self) -> Result<Vec<Tag>> {
        self.query_tags(select_tags!("ORDER BY category, identifier, id"), [])
    }

    /// Apply the set fields of `update`. Returns the number of rows changed.
    pub fn update_tag(&self, id: i64, update: &TagUpdate) -> Result<usize> {
        timed("update_tag", PerfFields::id(id), || {
            let mut assignments: Vec<&str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(description) = &update.description {
                assignments.push("description = ?");
                values.push(Value::Text(description.clone()));
            }
            if let Some(file_path) = &update.file_path {
                if file_path.is_empty() {
                    return Err(ValidationError::MissingFilePath {
                        identifier: format!("#{}", id),
                    }
                    .into());
                }
                assignments.push("file_path = ?");
                values.push(Value::Text(file_path.clone()));
            }
            if let Some(line) = update.line_number {
                assignments.push("line_number = ?");
                values.push(Value::Integer(line.into()));
            }
            if assignments.is_empty() {
                return Ok(0);
            }
            values.push(Value::Integer(id));

            // updated_at is left to the trigger
            let sql = format!("UPDATE tags SET {} WHERE id = ?", assignments.join(", "));
            let conn = self.connections.get_connection()?;
            let mut stmt = conn.prepare_cached(&sql)?;
            let changed = stmt.execute(params_from_iter(values))?;
            Ok(changed)
        })
    }

    /// Delete a tag; its references go with it through the cascade constraint
    pub fn delete_tag(&self, id: i64) -> Result<usize> {
        timed("delete_tag", PerfFields::id(id), || {
            let conn = self.connections.get_connection()?;
            let mut stmt = conn.prepare_cached("DELETE FROM tags WHERE id = ?1")?;
            Ok(stmt.execute([id])?)
        })
    }

    /// Insert many tags with multi-row statements, committed once.
    ///
    /// Every record is validated before anything is written; one bad
    /// record fails the whole call.
    pub fn bulk_insert_tags(&self, tags: &[NewTag]) -> Result<usize> {
        timed("bulk_insert_tags", PerfFields::rows(tags.len()), || {
            let categories = tags.iter().map(NewTag::validate).collect::<Result<Vec<_>>>()?;
            if tags.is_empty() {
                return Ok(0);
            }

            let conn = self.connections.get_connection()?;
            with_savepoint(&conn, "bulk_insert_tags", || {
                let mut inserted = 0;
                for (chunk, chunk_categories) in tags
                    .chunks(BULK_INSERT_CHUNK_ROWS)
                    .zip(categories.chunks(BULK_INSERT_CHUNK_ROWS))
                {
                    let mut stmt = conn.prepare_cached(&multi_row_insert_sql(chunk.len()))?;
                    let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 5);
                    for (tag, category) in chunk.iter().zip(chunk_categories) {
                        values.push(category);
                        values.push(&tag.identifier);
                        values.push(&tag.description);
                        values.push(&tag.file_path);
                        values.push(&tag.line_number);
                    }
                    inserted += stmt.execute(values.as_slice())?;
                }
                Ok(inserted)
            })
        })
    }

    /// Count all tags
    pub fn count_tags(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM tags")
    }

    // ========== Reference Operations ==========

    /// Link `source_id` to `target_id`. Both must exist; the foreign keys
    /// reject dangling edges.
    pub fn create_reference(
        &self,
        source_id: i64,
        target_id: i64,
        reference_type: Option<&str>,
    ) -> Result<i64> {
        timed("create_reference", PerfFields::id(source_id), || {
            let conn = self.connections.get_connection()?;
            let mut stmt = conn.prepare_cached(
                "INSERT INTO tag_references (source_tag_id, target_tag_id, reference_type) VALUES (?1, ?2, ?3)",
            )?;
            let id = stmt.insert(params![
                source_id,
                target_id,
                reference_type.unwrap_or(DEFAULT_REFERENCE_TYPE),
            ])?;
            Ok(id)
        })
    }

    /// Outgoing edges of a tag
    pub fn get_references_by_source(&self, source_id: i64) -> Result<Vec<Reference>> {
        self.query_references(select_references!("WHERE source_tag_id = ?1 ORDER BY id"), [source_id])
    }

    /// Incoming edges of a tag
    pub fn get_references_by_target(&self, target_id: i64) -> Result<Vec<Reference>> {
        self.query_references(select_references!("WHERE target_tag_id = ?1 ORDER BY id"), [target_id])
    }

    pub fn get_all_references(&self) -> Result<Vec<Reference>> {
        self.query_references(select_references!("ORDER BY id"), [])
    }

    /// Count all references
    pub fn count_references(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM tag_references")
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.connections.get_connection()?;
        let mut stmt = conn.prepare_cached("SELECT category, COUNT(*) FROM tags GROUP BY category")?;
        let by_category = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(StoreStats {
            tags: by_category.values().sum(),
            references: self.count_references()?,
            by_category,
        })
    }

    // ========== Helpers ==========

    fn query_tags<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Tag>> {
        let conn = self.connections.get_connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let tags = stmt
            .query_map(params, row_to_tag)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    fn query_references<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Reference>> {
        let conn = self.connections.get_connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let refs = stmt
            .query_map(params, row_to_reference)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let conn = self.connections.get_connection()?;
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Helper to convert a row to a Tag
fn row_to_tag(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        category: row.get(1)?,
        identifier: row.get(2)?,
        description: row.get(3)?,
        file_path: row.get(4)?,
        line_number: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Helper to convert a row to a Reference
fn row_to_reference(row: &rusqlite::Row) -> rusqlite::Result<Reference> {
    Ok(Reference {
        id: row.get(0)?,
        source_tag_id: row.get(1)?,
        target_tag_id: row.get(2)?,
        reference_type: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn multi_row_insert_sql(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO tags (category, identifier, description, file_path, line_number) VALUES ",
    );
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str("(?, ?, ?, ?, ?)");
    }
    sql
}

/// Escape LIKE metacharacters so `text` matches literally (escape char `\`)
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Turn a `*` wildcard pattern into a LIKE pattern
fn glob_to_like(pattern: &str) -> String {
    escape_like(pattern).replace('*', "%")
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub tags: usize,
    pub references: usize,
    pub by_category: BTreeMap<String, usize>,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Tags: {}", self.tags)?;
        for (category, count) in &self.by_category {
            writeln!(f, "    {}: {}", category, count)?;
        }
        write!(f, "  References: {}", self.references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_store;
    use crate::{DatabaseError, Error};
    use std::collections::HashSet;
    use std::time::Instant;

    fn req(identifier: &str, file: &str, line: u32) -> NewTag {
        NewTag::new("REQ", identifier, file).at_line(line)
    }

    #[test]
    fn test_insert_roundtrip() {
        let (_dir, store) = test_store();

        let id = store
            .insert_tag(&req("AUTH-001", "docs/auth.md", 12).with_description("Users log in"))
            .unwrap();
        let tag = store.get_tag_by_id(id).unwrap().unwrap();

        assert_eq!(tag.id, id);
        assert_eq!(tag.category, TagCategory::Requirement);
        assert_eq!(tag.identifier, "AUTH-001");
        assert_eq!(tag.description.as_deref(), Some("Users log in"));
        assert_eq!(tag.file_path, "docs/auth.md");
        assert_eq!(tag.line_number, Some(12));
        assert_eq!(tag.created_at, tag.updated_at);
    }

    #[test]
    fn test_alias_category_is_stored_canonically() {
        let (_dir, store) = test_store();
        let id = store.insert_tag(&NewTag::new("requirement", "R-1", "a.md")).unwrap();

        let tag = store.get_tag_by_id(id).unwrap().unwrap();
        assert_eq!(tag.category, TagCategory::Requirement);
        assert_eq!(store.find_tag(TagCategory::Requirement, "R-1").unwrap().unwrap().id, id);
    }

    #[test]
    fn test_get_missing_tag_is_none() {
        let (_dir, store) = test_store();
        assert!(store.get_tag_by_id(9999).unwrap().is_none());
    }

    #[test]
    fn test_invalid_category_rejected() {
        let (_dir, store) = test_store();
        store.insert_tag(&req("AUTH-001", "docs/auth.md", 1)).unwrap();

        let err = store
            .insert_tag(&NewTag::new("NOT_A_REAL_CATEGORY", "X-1", "docs/auth.md"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidCategory(ref c)) if c == "NOT_A_REAL_CATEGORY"));
        assert_eq!(store.count_tags().unwrap(), 1);
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let (_dir, store) = test_store();
        let err = store.insert_tag(&NewTag::new("TASK", "", "src/lib.rs")).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.count_tags().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_natural_keys_allowed() {
        let (_dir, store) = test_store();
        let first = store.insert_tag(&req("AUTH-001", "a.md", 1)).unwrap();
        let second = store.insert_tag(&req("AUTH-001", "b.md", 2)).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.search_tags_by_identifier("AUTH-001").unwrap().len(), 2);
        assert_eq!(store.find_tag(TagCategory::Requirement, "AUTH-001").unwrap().unwrap().id, first);
    }

    #[test]
    fn test_update_refreshes_timestamp() {
        let (_dir, store) = test_store();
        let id = store.insert_tag(&req("AUTH-001", "docs/auth.md", 1)).unwrap();
        let before = store.get_tag_by_id(id).unwrap().unwrap();

        let changed = store.update_tag(id, &TagUpdate::default().description("x")).unwrap();
        assert_eq!(changed, 1);

        let after = store.get_tag_by_id(id).unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.category, before.category);
        assert_eq!(after.identifier, before.identifier);
        assert_eq!(after.description.as_deref(), Some("x"));
    }

    #[test]
    fn test_back_to_back_updates_advance_timestamp() {
        let (_dir, store) = test_store();

        for i in 0..50 {
            let id = store.insert_tag(&req(&format!("FAST-{}", i), "docs/fast.md", i)).unwrap();
            let inserted = store.get_tag_by_id(id).unwrap().unwrap();

            store.update_tag(id, &TagUpdate::default().description("x")).unwrap();
            let first = store.get_tag_by_id(id).unwrap().unwrap();
            assert!(first.updated_at > inserted.updated_at, "iteration {}", i);

            store.update_tag(id, &TagUpdate::default().description("y")).unwrap();
            let second = store.get_tag_by_id(id).unwrap().unwrap();
            assert!(second.updated_at > first.updated_at, "iteration {}", i);
        }
    }

    #[test]
    fn test_update_ignores_disallowed_fields() {
        let (_dir, store) = test_store();
        let id = store.insert_tag(&req("AUTH-001", "docs/auth.md", 1)).unwrap();

        let update = TagUpdate::from_fields([("identifier", "HACKED"), ("line_number", "7")]);
        assert_eq!(store.update_tag(id, &update).unwrap(), 1);

        let tag = store.get_tag_by_id(id).unwrap().unwrap();
        assert_eq!(tag.identifier, "AUTH-001");
        assert_eq!(tag.line_number, Some(7));
    }

    #[test]
    fn test_empty_update_is_noop() {
        let (_dir, store) = test_store();
        let id = store.insert_tag(&req("AUTH-001", "docs/auth.md", 1)).unwrap();
        let before = store.get_tag_by_id(id).unwrap().unwrap();

        assert_eq!(store.update_tag(id, &TagUpdate::default()).unwrap(), 0);
        assert_eq!(store.update_tag(id, &TagUpdate::from_fields([("category", "TEST")])).unwrap(), 0);
        assert_eq!(store.get_tag_by_id(id).unwrap().unwrap(), before);
    }

    #[test]
    fn test_update_missing_tag() {
        let (_dir, store) = test_store();
        assert_eq!(store.update_tag(42, &TagUpdate::default().line_number(3)).unwrap(), 0);
    }

    #[test]
    fn test_updated_at_cannot_be_set_directly() {
        let (_dir, store) = test_store();
        let id = store.insert_tag(&req("AUTH-001", "docs/auth.md", 1)).unwrap();
        let before = store.get_tag_by_id(id).unwrap().unwrap();

        let conn = store.connections().get_connection().unwrap();
        conn.execute("UPDATE tags SET updated_at = '2000-01-01 00:00:00.000' WHERE id = ?1", [id])
            .unwrap();

        let after = store.get_tag_by_id(id).unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);
    }

    #[test]
    fn test_cascade_delete() {
        let (_dir, store) = test_store();
        let a = store.insert_tag(&req("A", "docs/a.md", 1)).unwrap();
        let b = store.insert_tag(&NewTag::new("DESIGN", "B", "docs/b.md")).unwrap();
        store.create_reference(a, b, None).unwrap();
        store.create_reference(b, a, Some("implements")).unwrap();

        assert_eq!(store.delete_tag(a).unwrap(), 1);

        assert!(store.get_tag_by_id(a).unwrap().is_none());
        assert!(store.get_tag_by_id(b).unwrap().is_some());
        assert!(store.get_references_by_source(a).unwrap().is_empty());
        assert!(store.get_references_by_source(b).unwrap().is_empty());
        assert_eq!(store.count_references().unwrap(), 0);
    }

    #[test]
    fn test_delete_missing_tag() {
        let (_dir, store) = test_store();
        assert_eq!(store.delete_tag(1).unwrap(), 0);
    }

    #[test]
    fn test_reference_defaults_and_lookup() {
        let (_dir, store) = test_store();
        let req_id = store.insert_tag(&req("AUTH-001", "docs/auth.md", 1)).unwrap();
        let test_id = store.insert_tag(&NewTag::new("TEST", "AUTH-001-T", "tests/auth.rs")).unwrap();

        let ref_id = store.create_reference(req_id, test_id, None).unwrap();
        let outgoing = store.get_references_by_source(req_id).unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].id, ref_id);
        assert_eq!(outgoing[0].target_tag_id, test_id);
        assert!(outgoing[0].is_chain());

        let incoming = store.get_references_by_target(test_id).unwrap();
        assert_eq!(incoming, outgoing);
        assert!(store.get_references_by_source(test_id).unwrap().is_empty());
    }

    #[test]
    fn test_reference_to_missing_tag_rejected() {
        let (_dir, store) = test_store();
        let a = store.insert_tag(&req("A", "docs/a.md", 1)).unwrap();

        let err = store.create_reference(a, a + 100, None).unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::Sqlite(_))));
        assert_eq!(store.count_references().unwrap(), 0);
    }

    #[test]
    fn test_search_ordering() {
        let (_dir, store) = test_store();
        store.insert_tag(&req("REQ-C", "docs/requirements.md", 30)).unwrap();
        store.insert_tag(&req("REQ-A", "docs/requirements.md", 10)).unwrap();
        store.insert_tag(&req("REQ-B", "docs/other.md", 5)).unwrap();
        store.insert_tag(&NewTag::new("TASK", "REQ-A", "docs/requirements.md").at_line(20)).unwrap();

        let by_category: Vec<String> = store
            .search_tags_by_category(TagCategory::Requirement)
            .unwrap()
            .into_iter()
            .map(|t| t.identifier)
            .collect();
        assert_eq!(by_category, vec!["REQ-A", "REQ-B", "REQ-C"]);

        let by_file: Vec<Option<u32>> = store
            .search_tags_by_file("docs/requirements.md")
            .unwrap()
            .into_iter()
            .map(|t| t.line_number)
            .collect();
        assert_eq!(by_file, vec![Some(10), Some(20), Some(30)]);

        let by_identifier = store.search_tags_by_identifier("REQ-A").unwrap();
        assert_eq!(by_identifier.len(), 2);

        assert!(store.search_tags_by_category(TagCategory::Security).unwrap().is_empty());
    }

    #[test]
    fn test_pattern_search() {
        let (_dir, store) = test_store();
        store.insert_tag(&req("LOGIN-2", "a.md", 1)).unwrap();
        store.insert_tag(&req("LOGOUT-1", "a.md", 2)).unwrap();
        store.insert_tag(&req("LOGIN-1", "a.md", 3)).unwrap();
        store.insert_tag(&req("PAY_100", "a.md", 4)).unwrap();
        store.insert_tag(&req("PAYX100", "a.md", 5)).unwrap();

        let ids: Vec<String> = store
            .search_tags_by_pattern("LOGIN")
            .unwrap()
            .into_iter()
            .map(|t| t.identifier)
            .collect();
        assert_eq!(ids, vec!["LOGIN-1", "LOGIN-2"]);

        // underscore is literal, not a single-character wildcard
        let literal = store.search_tags_by_pattern("Y_1").unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].identifier, "PAY_100");
    }

    #[test]
    fn test_line_range_search() {
        let (_dir, store) = test_store();
        store.insert_tag(&req("R1", "b.md", 10)).unwrap();
        store.insert_tag(&req("R2", "a.md", 10)).unwrap();
        store.insert_tag(&req("R3", "a.md", 5)).unwrap();
        store.insert_tag(&req("R4", "a.md", 21)).unwrap();
        store.insert_tag(&NewTag::new("REQ", "R5", "a.md")).unwrap();

        let found: Vec<String> = store
            .search_tags_by_line_range(5, 20)
            .unwrap()
            .into_iter()
            .map(|t| t.identifier)
            .collect();
        assert_eq!(found, vec!["R3", "R2", "R1"]);
        assert!(store.search_tags_by_line_range(20, 5).unwrap().is_empty());
    }

    #[test]
    fn test_thousand_tag_scenario() {
        let (_dir, store) = test_store();
        let categories = ["REQ", "DESIGN", "TASK", "TEST"];
        let tags: Vec<NewTag> = (0..1000)
            .map(|i| {
                NewTag::new(categories[i % 4], format!("ITEM-{:04}", i), format!("src/module_{}.rs", i % 10))
                    .at_line(i as u32 + 1)
            })
            .collect();
        assert_eq!(store.bulk_insert_tags(&tags).unwrap(), 1000);
        store.insert_tag(&NewTag::new("FEAT", "LOGIN-1", "/path/login.md").at_line(1)).unwrap();
        store.insert_tag(&NewTag::new("SEC", "LOGIN-2", "/path/login.md").at_line(2)).unwrap();

        for category in [TagCategory::Requirement, TagCategory::Design, TagCategory::Task, TagCategory::Test] {
            assert_eq!(store.search_tags_by_category(category).unwrap().len(), 250);
        }

        let login = store.complex_search(&TagQuery::new().file_pattern("*login*")).unwrap();
        assert_eq!(login.len(), 2);
        assert!(login.iter().all(|t| t.file_path == "/path/login.md"));
        // FEAT sorts before SEC
        assert_eq!(login[0].identifier, "LOGIN-1");

        assert_eq!(store.complex_search(&TagQuery::new()).unwrap().len(), 1002);
        assert_eq!(store.get_all_tags().unwrap().len(), 1002);
    }

    #[test]
    fn test_complex_search_combines_filters() {
        let (_dir, store) = test_store();
        store.insert_tag(&req("R-2", "src/auth/login.rs", 10)).unwrap();
        store.insert_tag(&req("R-1", "src/auth/token.rs", 50)).unwrap();
        store.insert_tag(&NewTag::new("TEST", "T-1", "src/auth/login.rs").at_line(12)).unwrap();
        store.insert_tag(&req("R-3", "src/billing.rs", 11)).unwrap();

        let query = TagQuery::new()
            .category(TagCategory::Requirement)
            .file_pattern("src/auth/*")
            .line_range(1, 20);
        let found = store.complex_search(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identifier, "R-2");

        let all: Vec<(TagCategory, String)> = store
            .complex_search(&TagQuery::new())
            .unwrap()
            .into_iter()
            .map(|t| (t.category, t.identifier))
            .collect();
        assert_eq!(
            all,
            vec![
                (TagCategory::Requirement, "R-1".to_string()),
                (TagCategory::Requirement, "R-2".to_string()),
                (TagCategory::Requirement, "R-3".to_string()),
                (TagCategory::Test, "T-1".to_string()),
            ]
        );

        let exact = store.complex_search(&TagQuery::new().file_pattern("src/billing.rs")).unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn test_bulk_insert_validates_everything_first() {
        let (_dir, store) = test_store();
        let tags = vec![
            req("OK-1", "a.md", 1),
            NewTag::new("BOGUS", "BAD-1", "a.md"),
            req("OK-2", "a.md", 2),
        ];

        assert!(store.bulk_insert_tags(&tags).unwrap_err().is_validation());
        assert_eq!(store.count_tags().unwrap(), 0);
        assert_eq!(store.bulk_insert_tags(&[]).unwrap(), 0);
    }

    #[test]
    fn test_bulk_insert_spans_chunks() {
        let (_dir, store) = test_store();
        let tags: Vec<NewTag> = (0..BULK_INSERT_CHUNK_ROWS * 2 + 7)
            .map(|i| NewTag::new("TASK", format!("T-{}", i), "todo.md"))
            .collect();

        assert_eq!(store.bulk_insert_tags(&tags).unwrap(), tags.len());
        assert_eq!(store.count_tags().unwrap(), tags.len());
    }

    #[test]
    fn test_bulk_insert_faster_than_individual() {
        let (_dir, store) = test_store();
        let make = |prefix: &str| -> Vec<NewTag> {
            (0..1000)
                .map(|i| NewTag::new("IMPL", format!("{}-{}", prefix, i), "src/lib.rs").at_line(i))
                .collect()
        };

        let individual = make("ONE");
        let started = Instant::now();
        for tag in &individual {
            store.insert_tag(tag).unwrap();
        }
        let individual_elapsed = started.elapsed();

        let batch = make("BULK");
        let started = Instant::now();
        store.bulk_insert_tags(&batch).unwrap();
        let bulk_elapsed = started.elapsed();

        assert_eq!(store.count_tags().unwrap(), 2000);
        assert!(
            bulk_elapsed < individual_elapsed,
            "bulk {:?} vs individual {:?}",
            bulk_elapsed,
            individual_elapsed
        );
    }

    #[test]
    fn test_concurrent_writers_preserve_count() {
        let (_dir, store) = test_store();

        std::thread::scope(|s| {
            for worker in 0..5 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..100 {
                        store
                            .insert_tag(&NewTag::new("TASK", format!("W{}-{:03}", worker, i), "src/worker.rs"))
                            .unwrap();
                    }
                    store.close();
                });
            }
        });

        let tags = store.get_all_tags().unwrap();
        assert_eq!(tags.len(), 500);
        let identifiers: HashSet<&str> = tags.iter().map(|t| t.identifier.as_str()).collect();
        assert_eq!(identifiers.len(), 500);
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = test_store();
        let a = store.insert_tag(&req("A", "a.md", 1)).unwrap();
        let b = store.insert_tag(&req("B", "a.md", 2)).unwrap();
        let c = store.insert_tag(&NewTag::new("TEST", "C", "t.rs")).unwrap();
        store.create_reference(a, c, None).unwrap();
        store.create_reference(b, c, None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.tags, 3);
        assert_eq!(stats.references, 2);
        assert_eq!(stats.by_category.get("REQ"), Some(&2));
        assert_eq!(stats.by_category.get("TEST"), Some(&1));
        assert_eq!(store.get_all_references().unwrap().len(), 2);
    }

    #[test]
    fn test_like_helpers() {
        assert_eq!(escape_like(r"50%_a\b"), r"50\%\_a\\b");
        assert_eq!(glob_to_like("*login*"), "%login%");
        assert_eq!(multi_row_insert_sql(2).matches("(?, ?, ?, ?, ?)").count(), 2);
    }
}
