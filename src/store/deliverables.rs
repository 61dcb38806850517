//! Deliverable CRUD, evaluation bookkeeping and the trailing-cost scan.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_id, parse_ts, ts, Store};
use crate::model::{Deliverable, EmployeeId, TaskId};
use uuid::Uuid;

fn row_to_deliverable(row: &Row<'_>) -> rusqlite::Result<Deliverable> {
    Ok(Deliverable {
        id: parse_id(&row.get::<_, String>("id")?)?,
        task_id: parse_id(&row.get::<_, String>("task_id")?)?,
        kind: row.get("kind")?,
        content: row.get("content")?,
        created_by: parse_id(&row.get::<_, String>("created_by")?)?,
        evaluated_by: row
            .get::<_, Option<String>>("evaluated_by")?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        evaluation_score: row.get("evaluation_score")?,
        feedback: row.get("feedback")?,
        cost_cents: row.get("cost_cents")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
    })
}

impl Store {
    pub fn create_deliverable(&self, deliverable: &Deliverable) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO deliverables (id, task_id, kind, content, created_by, evaluated_by,
                                       evaluation_score, feedback, cost_cents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                deliverable.id.to_string(),
                deliverable.task_id.to_string(),
                deliverable.kind,
                deliverable.content,
                deliverable.created_by.to_string(),
                deliverable.evaluated_by.map(|id| id.to_string()),
                deliverable.evaluation_score,
                deliverable.feedback,
                deliverable.cost_cents,
                ts(deliverable.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_deliverable(&self, id: Uuid) -> anyhow::Result<Option<Deliverable>> {
        let conn = self.conn();
        let deliverable = conn
            .query_row(
                "SELECT * FROM deliverables WHERE id = ?1",
                params![id.to_string()],
                row_to_deliverable,
            )
            .optional()?;
        Ok(deliverable)
    }

    pub fn list_deliverables_for_task(&self, task_id: TaskId) -> anyhow::Result<Vec<Deliverable>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM deliverables WHERE task_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![task_id.to_string()], row_to_deliverable)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The one deliverable subject to evaluation: latest for the task and
    /// not yet evaluated. Older revisions keep their scores.
    pub fn latest_unevaluated(&self, task_id: TaskId) -> anyhow::Result<Option<Deliverable>> {
        let conn = self.conn();
        let deliverable = conn
            .query_row(
                "SELECT * FROM deliverables
                 WHERE task_id = ?1 AND evaluated_by IS NULL
                 ORDER BY created_at DESC LIMIT 1",
                params![task_id.to_string()],
                row_to_deliverable,
            )
            .optional()?;
        Ok(deliverable)
    }

    /// Latest deliverable regardless of evaluation state (revision
    /// feedback attaches here).
    pub fn latest_deliverable(&self, task_id: TaskId) -> anyhow::Result<Option<Deliverable>> {
        let conn = self.conn();
        let deliverable = conn
            .query_row(
                "SELECT * FROM deliverables
                 WHERE task_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![task_id.to_string()],
                row_to_deliverable,
            )
            .optional()?;
        Ok(deliverable)
    }

    /// Record an evaluation outcome on a deliverable.
    pub fn record_evaluation(
        &self,
        id: Uuid,
        evaluator: EmployeeId,
        score: i64,
        feedback: Option<&str>,
    ) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE deliverables SET evaluated_by = ?2, evaluation_score = ?3, feedback = ?4
             WHERE id = ?1",
            params![id.to_string(), evaluator.to_string(), score, feedback],
        )?;
        Ok(())
    }

    /// Attach revision feedback to a deliverable without scoring it.
    pub fn attach_feedback(&self, id: Uuid, feedback: &str) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE deliverables SET feedback = ?2 WHERE id = ?1",
            params![id.to_string(), feedback],
        )?;
        Ok(())
    }

    /// Spend attributed to `employee` since `since`, in cents. The hiring
    /// engine uses a trailing 30-day window.
    pub fn cost_since(&self, employee: EmployeeId, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let total: Option<i64> = self.conn().query_row(
            "SELECT SUM(cost_cents) FROM deliverables
             WHERE created_by = ?1 AND created_at >= ?2",
            params![employee.to_string(), ts(since)],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn latest_unevaluated_tracks_revision_cycles() {
        let store = Store::open_in_memory().unwrap();
        let task_id = Uuid::new_v4();
        let worker = Uuid::new_v4();
        let manager = Uuid::new_v4();

        let mut first = Deliverable::new(task_id, "text", "v1", worker, 10);
        first.created_at = Utc::now() - Duration::minutes(5);
        store.create_deliverable(&first).unwrap();

        assert_eq!(store.latest_unevaluated(task_id).unwrap().unwrap().id, first.id);

        store
            .record_evaluation(first.id, manager, 5, Some("too thin"))
            .unwrap();
        assert!(store.latest_unevaluated(task_id).unwrap().is_none());

        let second = Deliverable::new(task_id, "text", "v2", worker, 12);
        store.create_deliverable(&second).unwrap();
        assert_eq!(store.latest_unevaluated(task_id).unwrap().unwrap().id, second.id);

        // The first revision keeps its score.
        let first_back = store.get_deliverable(first.id).unwrap().unwrap();
        assert_eq!(first_back.evaluation_score, Some(5));
        assert_eq!(first_back.feedback.as_deref(), Some("too thin"));
    }

    #[test]
    fn cost_window_excludes_old_spend() {
        let store = Store::open_in_memory().unwrap();
        let worker = Uuid::new_v4();
        let task_id = Uuid::new_v4();

        let mut old = Deliverable::new(task_id, "text", "old", worker, 500);
        old.created_at = Utc::now() - Duration::days(45);
        store.create_deliverable(&old).unwrap();

        let recent = Deliverable::new(task_id, "text", "recent", worker, 120);
        store.create_deliverable(&recent).unwrap();

        let window_start = Utc::now() - Duration::days(30);
        assert_eq!(store.cost_since(worker, window_start).unwrap(), 120);
    }

    #[test]
    fn cost_is_zero_for_unknown_worker() {
        let store = Store::open_in_memory().unwrap();
        let nobody = Uuid::new_v4();
        assert_eq!(store.cost_since(nobody, Utc::now()).unwrap(), 0);
    }
}
