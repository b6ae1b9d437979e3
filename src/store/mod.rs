//! Document store gateway: typed access to named collections with
//! upsert/bulk-write/find-by-id semantics over embedded SQLite.
//!
//! Every collection is a table of `(_id TEXT PRIMARY KEY, doc TEXT)` JSON
//! documents; secondary indexes are declared idempotently over
//! `json_extract` expressions at connect time. Write operations are counted
//! so idempotence ("a second run performs only reads") is observable from
//! tests.

pub mod models;

use std::cell::Cell;
use std::path::Path;

use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::ForagerError;

// ─── Collection names ────────────────────────────────────────────────

pub const REPOSITORIES: &str = "repositories";
pub const COMMITS: &str = "commits";
pub const FILES: &str = "files";
pub const LFS_POINTERS: &str = "lfs_pointers";
pub const PULL_REQUESTS: &str = "pull_requests";
pub const PULL_REQUEST_COMMENTS: &str = "pull_requests_comments";
pub const ISSUES: &str = "issues";
pub const ISSUE_COMMENTS: &str = "issues_comments";
pub const MAIN_FILES: &str = "main_files";
pub const LAST_RELEASE_FILES: &str = "last_release_files";
pub const CONTRIBUTORS: &str = "contributors";
pub const METADATA: &str = "metadata";
pub const CHUNKS: &str = "chunks";

/// All collections, in bootstrap order.
const ALL_COLLECTIONS: &[&str] = &[
    REPOSITORIES,
    COMMITS,
    FILES,
    LFS_POINTERS,
    PULL_REQUESTS,
    PULL_REQUEST_COMMENTS,
    ISSUES,
    ISSUE_COMMENTS,
    MAIN_FILES,
    LAST_RELEASE_FILES,
    CONTRIBUTORS,
    METADATA,
    CHUNKS,
];

// ─── Filters ─────────────────────────────────────────────────────────

enum Clause {
    IdEq(String),
    IdIn(Vec<String>),
    FieldEq(String, Value),
    FieldIn(String, Vec<String>),
    FieldExists(String),
}

/// Conjunctive document filter. An empty filter matches everything.
#[derive(Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Match every document in the collection.
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn id(id: &str) -> Self {
        Filter::all().and_id(id)
    }

    pub fn id_in<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Filter {
            clauses: vec![Clause::IdIn(ids.into_iter().collect())],
        }
    }

    pub fn field(name: &str, value: impl Into<Value>) -> Self {
        Filter::all().and_field(name, value)
    }

    pub fn and_id(mut self, id: &str) -> Self {
        self.clauses.push(Clause::IdEq(id.to_string()));
        self
    }

    pub fn and_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::FieldEq(name.to_string(), value.into()));
        self
    }

    pub fn and_field_in<I: IntoIterator<Item = String>>(mut self, name: &str, values: I) -> Self {
        self.clauses
            .push(Clause::FieldIn(name.to_string(), values.into_iter().collect()));
        self
    }

    pub fn and_exists(mut self, name: &str) -> Self {
        self.clauses.push(Clause::FieldExists(name.to_string()));
        self
    }

    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        if self.clauses.is_empty() {
            return ("1=1".to_string(), Vec::new());
        }
        let mut parts = Vec::new();
        let mut params = Vec::new();
        for clause in &self.clauses {
            match clause {
                Clause::IdEq(id) => {
                    parts.push("_id = ?".to_string());
                    params.push(SqlValue::Text(id.clone()));
                }
                Clause::IdIn(ids) => {
                    parts.push(in_list("_id", ids.len()));
                    params.extend(ids.iter().map(|i| SqlValue::Text(i.clone())));
                }
                Clause::FieldEq(name, value) => {
                    parts.push(format!("json_extract(doc, '$.{}') = ?", name));
                    params.push(json_to_sql(value));
                }
                Clause::FieldIn(name, values) => {
                    parts.push(in_list(&format!("json_extract(doc, '$.{}')", name), values.len()));
                    params.extend(values.iter().map(|v| SqlValue::Text(v.clone())));
                }
                Clause::FieldExists(name) => {
                    parts.push(format!("json_extract(doc, '$.{}') IS NOT NULL", name));
                }
            }
        }
        (parts.join(" AND "), params)
    }
}

fn in_list(expr: &str, len: usize) -> String {
    if len == 0 {
        // IN () is a syntax error; an empty id set matches nothing.
        return "0=1".to_string();
    }
    let marks = vec!["?"; len].join(",");
    format!("{} IN ({})", expr, marks)
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Null => SqlValue::Null,
        other => SqlValue::Text(other.to_string()),
    }
}

// ─── Write accounting ────────────────────────────────────────────────

/// Counts of write operations performed since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl WriteStats {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────

/// Gateway over the document database. One handle per pipeline process;
/// pass by reference into collectors and the generator.
pub struct Store {
    conn: Connection,
    inserted: Cell<u64>,
    updated: Cell<u64>,
    deleted: Cell<u64>,
}

impl Store {
    /// Open (creating if needed) the database and bootstrap all collection
    /// tables and secondary indexes.
    pub fn open(path: &Path) -> Result<Self, ForagerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Store {
            conn,
            inserted: Cell::new(0),
            updated: Cell::new(0),
            deleted: Cell::new(0),
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, ForagerError> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn,
            inserted: Cell::new(0),
            updated: Cell::new(0),
            deleted: Cell::new(0),
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// Create tables and declare every index, idempotently.
    fn bootstrap(&self) -> Result<(), ForagerError> {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        for collection in ALL_COLLECTIONS {
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {c} (_id TEXT PRIMARY KEY, doc TEXT NOT NULL);",
                c = collection
            ))?;
        }
        for ddl in index_ddl() {
            self.conn.execute_batch(&ddl)?;
        }
        debug!("Document store bootstrapped ({} collections)", ALL_COLLECTIONS.len());
        Ok(())
    }

    // ─── Reads ───────────────────────────────────────────────────

    pub fn find_one<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<T>, ForagerError> {
        let (clause, params) = filter.to_sql();
        let sql = format!("SELECT doc FROM {} WHERE {} LIMIT 1", collection, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// All matching documents. The gateway materializes the cursor; every
    /// collection pass in this pipeline consumes its results anyway.
    pub fn find<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<T>, ForagerError> {
        let (clause, params) = filter.to_sql();
        let sql = format!("SELECT doc FROM {} WHERE {}", collection, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }

    /// Projection to `_id` only.
    pub fn find_ids(&self, collection: &str, filter: &Filter) -> Result<Vec<String>, ForagerError> {
        let (clause, params) = filter.to_sql();
        let sql = format!("SELECT _id FROM {} WHERE {}", collection, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    /// First document ordered by a JSON field, descending. Serves "most
    /// recently stored commit" without loading the collection.
    pub fn find_one_sorted_desc<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: &Filter,
        order_field: &str,
    ) -> Result<Option<T>, ForagerError> {
        let (clause, params) = filter.to_sql();
        let sql = format!(
            "SELECT doc FROM {} WHERE {} ORDER BY json_extract(doc, '$.{}') DESC LIMIT 1",
            collection, clause, order_field
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub fn count(&self, collection: &str, filter: &Filter) -> Result<u64, ForagerError> {
        let (clause, params) = filter.to_sql();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", collection, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let n: i64 = stmt.query_row(rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(n as u64)
    }

    // ─── Writes ──────────────────────────────────────────────────

    /// Insert a batch of documents, skipping ids already present. Returns
    /// the number actually inserted.
    pub fn insert_many<T: Serialize>(
        &self,
        collection: &str,
        docs: &[T],
    ) -> Result<u64, ForagerError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (_id, doc) VALUES (?, ?)",
                collection
            ))?;
            for doc in docs {
                let value = serde_json::to_value(doc)?;
                let id = doc_id(&value)?;
                inserted += stmt.execute(rusqlite::params![id, value.to_string()])? as u64;
            }
        }
        tx.commit()?;
        self.inserted.set(self.inserted.get() + inserted);
        Ok(inserted)
    }

    /// Upsert one document by id. A write is only issued (and counted) when
    /// the stored document actually differs, so unchanged re-runs stay
    /// read-only.
    pub fn update_one<T: Serialize>(
        &self,
        collection: &str,
        doc: &T,
        upsert: bool,
    ) -> Result<(), ForagerError> {
        let value = serde_json::to_value(doc)?;
        let id = doc_id(&value)?;
        let serialized = value.to_string();

        let existing: Option<String> = {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT doc FROM {} WHERE _id = ?", collection))?;
            let mut rows = stmt.query(rusqlite::params![id])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };

        match existing {
            Some(old) if old == serialized => Ok(()),
            Some(_) => {
                self.conn.execute(
                    &format!("UPDATE {} SET doc = ? WHERE _id = ?", collection),
                    rusqlite::params![serialized, id],
                )?;
                self.updated.set(self.updated.get() + 1);
                Ok(())
            }
            None if upsert => {
                self.conn.execute(
                    &format!("INSERT INTO {} (_id, doc) VALUES (?, ?)", collection),
                    rusqlite::params![id, serialized],
                )?;
                self.inserted.set(self.inserted.get() + 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Apply a batch of `{_id, $set: doc}` upserts inside one transaction.
    pub fn bulk_upsert<T: Serialize>(
        &self,
        collection: &str,
        docs: &[T],
    ) -> Result<u64, ForagerError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0u64;
        let mut inserted = 0u64;
        {
            let mut select = tx.prepare(&format!("SELECT doc FROM {} WHERE _id = ?", collection))?;
            let mut upsert = tx.prepare(&format!(
                "INSERT INTO {} (_id, doc) VALUES (?1, ?2) \
                 ON CONFLICT(_id) DO UPDATE SET doc = ?2",
                collection
            ))?;
            for doc in docs {
                let value = serde_json::to_value(doc)?;
                let id = doc_id(&value)?;
                let serialized = value.to_string();
                let mut rows = select.query(rusqlite::params![id])?;
                let existing: Option<String> = match rows.next()? {
                    Some(row) => Some(row.get(0)?),
                    None => None,
                };
                match existing {
                    Some(old) if old == serialized => continue,
                    Some(_) => written += 1,
                    None => inserted += 1,
                }
                upsert.execute(rusqlite::params![id, serialized])?;
            }
        }
        tx.commit()?;
        self.updated.set(self.updated.get() + written);
        self.inserted.set(self.inserted.get() + inserted);
        Ok(written + inserted)
    }

    /// Set one string field on one document (the `metadata_id` backlink).
    /// No write is issued when the stored value already matches.
    pub fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), ForagerError> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {c} SET doc = json_set(doc, '$.{f}', ?1) \
                 WHERE _id = ?2 AND json_extract(doc, '$.{f}') IS NOT ?1",
                c = collection,
                f = field
            ),
            rusqlite::params![value, id],
        )?;
        self.updated.set(self.updated.get() + changed as u64);
        Ok(())
    }

    pub fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, ForagerError> {
        let (clause, params) = filter.to_sql();
        let sql = format!("DELETE FROM {} WHERE {}", collection, clause);
        let deleted = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(params))? as u64;
        self.deleted.set(self.deleted.get() + deleted);
        Ok(deleted)
    }

    // ─── Accounting ──────────────────────────────────────────────

    pub fn write_stats(&self) -> WriteStats {
        WriteStats {
            inserted: self.inserted.get(),
            updated: self.updated.get(),
            deleted: self.deleted.get(),
        }
    }

    pub fn reset_write_stats(&self) {
        self.inserted.set(0);
        self.updated.set(0);
        self.deleted.set(0);
    }
}

fn doc_id(value: &Value) -> Result<String, ForagerError> {
    value
        .get("_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ForagerError::InvalidArgs("document has no string _id".to_string()))
}

/// Secondary index declarations for all collections, mirroring the query
/// paths of the collectors and the generator.
fn index_ddl() -> Vec<String> {
    let mut ddl: Vec<String> = Vec::new();

    let mut composite = |name: &str, table: &str, exprs: &[&str]| {
        let cols = exprs
            .iter()
            .map(|e| format!("json_extract(doc, '$.{}')", e.trim_end_matches(" DESC")))
            .zip(exprs.iter())
            .map(|(col, raw)| {
                if raw.ends_with(" DESC") {
                    format!("{} DESC", col)
                } else {
                    col
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        ddl.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
            name, table, cols
        ));
    };

    composite("idx_commits_repo_date", COMMITS, &["repo", "date DESC"]);
    composite("idx_files_commit", FILES, &["commit_id"]);
    composite("idx_files_repo", FILES, &["repo"]);
    composite("idx_metadata_src", METADATA, &["collection_src"]);
    composite("idx_metadata_repo", METADATA, &["repo"]);
    composite("idx_chunks_metadata", CHUNKS, &["metadata_id"]);
    composite("idx_chunks_index", CHUNKS, &["chunk_index"]);
    composite("idx_lfs_file", LFS_POINTERS, &["file_id"]);

    for table in [ISSUES, PULL_REQUESTS] {
        composite(&format!("idx_{}_repo", table), table, &["repo"]);
        composite(&format!("idx_{}_updated", table), table, &["updated_at DESC"]);
        composite(&format!("idx_{}_state", table), table, &["state"]);
        composite(&format!("idx_{}_labels", table), table, &["labels"]);
        composite(&format!("idx_{}_repo_state", table), table, &["repo", "state"]);
    }

    for table in [MAIN_FILES, LAST_RELEASE_FILES] {
        composite(&format!("idx_{}_repo", table), table, &["repo"]);
        composite(&format!("idx_{}_filename", table), table, &["filename"]);
        composite(&format!("idx_{}_blob", table), table, &["commit_id DESC"]);
        composite(&format!("idx_{}_metadata", table), table, &["metadata_id"]);
    }

    for table in [ISSUE_COMMENTS, PULL_REQUEST_COMMENTS] {
        composite(&format!("idx_{}_parent", table), table, &["repo", "parent_id"]);
    }

    // Unique contributor email; sparse embedding presence index.
    ddl.push(format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_contributors_email ON {} (json_extract(doc, '$.email'));",
        CONTRIBUTORS
    ));
    ddl.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON {} (json_extract(doc, '$.embedding')) \
         WHERE json_extract(doc, '$.embedding') IS NOT NULL;",
        CHUNKS
    ));

    ddl
}
