//! Shared store: the single source of truth for the organization.
//!
//! Backed by SQLite. Every role loop holds an `Arc<Store>` and all
//! mutations are single statements, so concurrent loops race at the row
//! level with last-write-wins semantics (documented-acceptable; see the
//! concurrency notes in the crate docs). Handlers are written so the next
//! proactive scan self-corrects any partially applied multi-entity
//! operation.

mod deliverables;
mod employees;
mod memories;
mod reports;
mod tasks;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Store handle shared across role loops and the API.
pub type SharedStore = Arc<Store>;

/// SQLite-backed store for the five org tables.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Grab the connection. A poisoned lock is recovered rather than
    /// propagated: the connection itself is still usable and the loops
    /// must keep running.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    role        TEXT NOT NULL,
    skills      TEXT NOT NULL DEFAULT '[]',
    status      TEXT NOT NULL DEFAULT 'active',
    manager_id  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    priority        TEXT NOT NULL DEFAULT 'medium',
    assigned_to     TEXT,
    parent_task_id  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    completed_at    TEXT
);

CREATE TABLE IF NOT EXISTS deliverables (
    id                TEXT PRIMARY KEY,
    task_id           TEXT NOT NULL,
    kind              TEXT NOT NULL,
    content           TEXT NOT NULL,
    created_by        TEXT NOT NULL,
    evaluated_by      TEXT,
    evaluation_score  INTEGER,
    feedback          TEXT,
    cost_cents        INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    id           TEXT PRIMARY KEY,
    employee_id  TEXT NOT NULL,
    kind         TEXT NOT NULL,
    content      TEXT NOT NULL,
    importance   REAL NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reports (
    id            TEXT PRIMARY KEY,
    manager_id    TEXT NOT NULL,
    ceo_id        TEXT NOT NULL,
    period_start  TEXT NOT NULL,
    period_end    TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'submitted',
    content       TEXT NOT NULL,
    response      TEXT,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_assigned ON tasks(assigned_to);
CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id);
CREATE INDEX IF NOT EXISTS idx_deliverables_task ON deliverables(task_id);
CREATE INDEX IF NOT EXISTS idx_memories_employee ON memories(employee_id);
"#;

/// Encode a timestamp for storage.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Decode a stored timestamp, surfacing bad data as a conversion error.
pub(crate) fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Decode an optional stored timestamp.
pub(crate) fn parse_opt_ts(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Decode a stored UUID column.
pub(crate) fn parse_id(raw: &str) -> rusqlite::Result<uuid::Uuid> {
    raw.parse().map_err(|e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Decode an enum column via its `FromStr`.
pub(crate) fn parse_enum<T>(raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_bootstrap_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        // Re-running the schema against the same connection must be a no-op.
        store.conn().execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn open_on_disk_creates_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("org.db");
        {
            let _store = Store::open(&path).unwrap();
        }
        assert!(path.exists());
        // Reopening finds the existing schema.
        let _store = Store::open(&path).unwrap();
    }
}
