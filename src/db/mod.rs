//! Persistence layer for the task board.

mod collection;
mod document;
pub mod memory;

pub use collection::{Collection, TaskStore, UserStore};
pub use document::{DocumentStore, StoreError, StoreResult, UNIQUE_FIELDS, Update, document_id};
pub use memory::MemoryStore;

use crate::query::Filter;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
///
/// Documents are stored as JSON text; filters are evaluated in Rust over the
/// rows of one collection. Every call holds the connection lock for its whole
/// duration, which gives per-document (and per-call) atomicity.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            embedded::migrations::runner().run(conn)?;
            Ok(())
        })
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}

/// Load every document of a collection as `(seq, body)`, in natural order.
fn load_collection(conn: &Connection, collection: &str) -> StoreResult<Vec<(i64, Value)>> {
    let mut stmt =
        conn.prepare("SELECT seq, body FROM documents WHERE collection = ?1 ORDER BY seq")?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (seq, body) = row?;
        docs.push((seq, serde_json::from_str(&body)?));
    }
    Ok(docs)
}

/// Load the documents a filter selects, using the primary key when the filter
/// pins `_id`.
fn load_matching(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
) -> StoreResult<Vec<(i64, Value)>> {
    if let Some(id) = filter.as_id() {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        return match row {
            Some((seq, body)) => Ok(vec![(seq, serde_json::from_str(&body)?)]),
            None => Ok(Vec::new()),
        };
    }

    Ok(load_collection(conn, collection)?
        .into_iter()
        .filter(|(_, doc)| filter.matches(doc))
        .collect())
}

/// Translate unique-index violations into [`StoreError::DuplicateKey`].
fn map_constraint(collection: &str, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err
        && code.code == rusqlite::ErrorCode::ConstraintViolation
    {
        if let Some((_, field)) = UNIQUE_FIELDS
            .iter()
            .find(|(c, f)| *c == collection && message.contains(&format!("ux_{}_{}", c, f)))
        {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: field.to_string(),
            };
        }
        if message.contains("documents.id") {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: "_id".to_string(),
            };
        }
    }
    StoreError::Sqlite(err)
}

impl DocumentStore for Database {
    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>> {
        self.with_conn(|conn| {
            Ok(load_matching(conn, collection, filter)?
                .into_iter()
                .map(|(_, doc)| doc)
                .collect())
        })
    }

    fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.with_conn(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
                .transpose()
        })
    }

    fn insert(&self, collection: &str, doc: Value) -> StoreResult<()> {
        let id = document_id(collection, &doc)?.to_string();
        let body = serde_json::to_string(&doc)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
                params![collection, id, body],
            )
            .map_err(|e| map_constraint(collection, e))?;
            Ok(())
        })
    }

    fn replace(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool> {
        let body = serde_json::to_string(&doc)?;
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
                    params![collection, id, body],
                )
                .map_err(|e| map_constraint(collection, e))?;
            Ok(changed > 0)
        })
    }

    fn update_matching(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut matched = 0u64;
            for (seq, mut doc) in load_matching(&tx, collection, filter)? {
                matched += 1;
                if update.apply(&mut doc) {
                    tx.execute(
                        "UPDATE documents SET body = ?2 WHERE seq = ?1",
                        params![seq, serde_json::to_string(&doc)?],
                    )
                    .map_err(|e| map_constraint(collection, e))?;
                }
            }
            tx.commit()?;
            Ok(matched)
        })
    }

    fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0u64;
            for (seq, _) in load_matching(&tx, collection, filter)? {
                removed += tx.execute("DELETE FROM documents WHERE seq = ?1", params![seq])? as u64;
            }
            tx.commit()?;
            Ok(removed)
        })
    }
}
