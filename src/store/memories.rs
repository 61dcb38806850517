//! Append-only memory log per employee.

use rusqlite::{params, Row};

use super::{parse_enum, parse_id, parse_ts, ts, Store};
use crate::model::{EmployeeId, MemoryEntry, MemoryKind};

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: parse_id(&row.get::<_, String>("id")?)?,
        employee_id: parse_id(&row.get::<_, String>("employee_id")?)?,
        kind: parse_enum::<MemoryKind>(&row.get::<_, String>("kind")?)?,
        content: row.get("content")?,
        importance: row.get("importance")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
    })
}

impl Store {
    /// Append one entry. Memories are never updated or deleted.
    pub fn append_memory(&self, entry: &MemoryEntry) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO memories (id, employee_id, kind, content, importance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.employee_id.to_string(),
                entry.kind.to_string(),
                entry.content,
                entry.importance,
                ts(entry.created_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent entries first, bounded. Bounded context for prompts.
    pub fn recent_memories(
        &self,
        employee: EmployeeId,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM memories WHERE employee_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![employee.to_string(), limit as i64], row_to_memory)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Total entries for one employee; half of the experience metric.
    pub fn count_memories(&self, employee: EmployeeId) -> anyhow::Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM memories WHERE employee_id = ?1",
            params![employee.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
