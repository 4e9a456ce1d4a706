use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub const DB_FILE: &str = "results.sqlite3";

/// Collection names, kept in one place so handlers and tests agree.
pub mod collections {
    pub const CLASSES: &str = "classes";
    pub const STUDENTS: &str = "students";
    pub const SUBJECTS: &str = "subjects";
    pub const EXAMS: &str = "exams";
    pub const STAFF: &str = "staff";
    pub const REPORTS: &str = "reports";
    pub const SETTINGS: &str = "settings";
}

/// Open (creating if needed) the workspace store at `<workspace>/db/`.
pub fn open_store(workspace: &Path) -> Result<Connection> {
    let db_dir = workspace.join("db");
    std::fs::create_dir_all(&db_dir)
        .with_context(|| format!("create db dir: {}", db_dir.display()))?;
    let db_path = db_dir.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("open store: {}", db_path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Idempotent schema setup; safe to run on every open.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (collection, id)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);",
    )
    .context("init document store schema")?;
    ensure_updated_at(conn)?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name?.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

// Workspaces written before the timestamp column existed still open.
fn ensure_updated_at(conn: &Connection) -> Result<()> {
    if !table_has_column(conn, "documents", "updated_at")? {
        conn.execute_batch("ALTER TABLE documents ADD COLUMN updated_at TEXT NOT NULL DEFAULT ''")
            .context("add documents.updated_at")?;
    }
    Ok(())
}

/// Every document of a collection, ordered by id so list surfaces are
/// deterministic.
pub fn get_all(conn: &Connection, collection: &str) -> Result<Vec<(String, Value)>> {
    let mut stmt = conn
        .prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")
        .context("prepare collection scan")?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, body) = row?;
        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("parse document {}/{}", collection, id))?;
        out.push((id, value));
    }
    Ok(out)
}

pub fn get_by_id(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    match body {
        Some(b) => {
            let value: Value = serde_json::from_str(&b)
                .with_context(|| format!("parse document {}/{}", collection, id))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Write a document. With `merge` the record is deep-merged over the stored
/// body; without it the body is replaced whole.
pub fn set(
    conn: &Connection,
    collection: &str,
    id: &str,
    record: &Value,
    merge: bool,
) -> Result<()> {
    let body = if merge {
        match get_by_id(conn, collection, id)? {
            Some(mut existing) => {
                merge_value(&mut existing, record);
                existing
            }
            None => record.clone(),
        }
    } else {
        record.clone()
    };
    conn.execute(
        "INSERT INTO documents (collection, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![collection, id, body.to_string(), Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("write document {}/{}", collection, id))?;
    Ok(())
}

pub fn delete(conn: &Connection, collection: &str, id: &str) -> Result<bool> {
    let n = conn
        .execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )
        .with_context(|| format!("delete document {}/{}", collection, id))?;
    Ok(n > 0)
}

/// Deep merge: objects merge key-by-key recursively; everything else
/// (arrays, scalars, and explicit nulls) replaces the stored value.
pub fn merge_value(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            for (k, v) in p {
                match b.get_mut(k) {
                    Some(slot) if slot.is_object() && v.is_object() => merge_value(slot, v),
                    _ => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}
