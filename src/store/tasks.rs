//! Task CRUD and the filtered scans the role loops poll.
//!
//! Status mutations here are single-statement last-write-wins; the
//! lifecycle module decides which mutation is legal, this file just
//! performs it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_enum, parse_id, parse_opt_ts, parse_ts, ts, Store};
use crate::model::{EmployeeId, Task, TaskId, TaskPriority, TaskStatus};

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: parse_id(&row.get::<_, String>("id")?)?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: parse_enum::<TaskStatus>(&row.get::<_, String>("status")?)?,
        priority: parse_enum::<TaskPriority>(&row.get::<_, String>("priority")?)?,
        assigned_to: row
            .get::<_, Option<String>>("assigned_to")?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        parent_task_id: row
            .get::<_, Option<String>>("parent_task_id")?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
        completed_at: parse_opt_ts(row.get("completed_at")?)?,
    })
}

impl Store {
    pub fn create_task(&self, task: &Task) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO tasks (id, title, description, status, priority, assigned_to,
                                parent_task_id, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.id.to_string(),
                task.title,
                task.description,
                task.status.to_string(),
                task.priority.to_string(),
                task.assigned_to.map(|id| id.to_string()),
                task.parent_task_id.map(|id| id.to_string()),
                ts(task.created_at),
                ts(task.updated_at),
                task.completed_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: TaskId) -> anyhow::Result<Option<Task>> {
        let conn = self.conn();
        let task = conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![id.to_string()],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Newest first, bounded. The read API serves this directly so it
    /// always reflects store state, never cache.
    pub fn list_tasks(&self, limit: usize) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM tasks ORDER BY created_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// HR's intake scan: top-level pending tasks nobody owns yet,
    /// highest priority first, oldest first within a priority.
    pub fn list_unassigned_pending(&self) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks
             WHERE status = 'pending' AND assigned_to IS NULL AND parent_task_id IS NULL
             ORDER BY CASE priority
                 WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3
             END, created_at",
        )?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// A worker's open plate: tasks assigned to them that are not done.
    pub fn list_open_for(&self, employee: EmployeeId) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks
             WHERE assigned_to = ?1 AND status IN ('pending', 'in_progress')
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![employee.to_string()], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_subtasks(&self, parent: TaskId) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE parent_task_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![parent.to_string()], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Completed tasks owned by any of `manager_id`'s direct reports.
    /// The manager's review scan polls this.
    pub fn list_completed_for_manager(&self, manager_id: EmployeeId) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.* FROM tasks t
             JOIN employees e ON t.assigned_to = e.id
             WHERE e.manager_id = ?1 AND t.status = 'completed'
             ORDER BY t.updated_at",
        )?;
        let rows = stmt.query_map(params![manager_id.to_string()], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// In-progress count for one worker; the hiring engine's load metric.
    pub fn count_in_progress(&self, employee: EmployeeId) -> anyhow::Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM tasks WHERE assigned_to = ?1 AND status = 'in_progress'",
            params![employee.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Finished work (completed or reviewed) for one worker, oldest
    /// first. Rebuilds the cached worker state.
    pub fn list_finished_by(&self, employee: EmployeeId) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks
             WHERE assigned_to = ?1 AND status IN ('completed', 'reviewed')
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![employee.to_string()], row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Finished work (completed or reviewed); half of the experience metric.
    pub fn count_finished_by(&self, employee: EmployeeId) -> anyhow::Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE assigned_to = ?1 AND status IN ('completed', 'reviewed')",
            params![employee.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// pending -> in_progress, claiming the task for `employee`.
    pub fn assign_task(&self, id: TaskId, employee: EmployeeId) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE tasks SET status = 'in_progress', assigned_to = ?2, updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), employee.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }

    /// in_progress -> completed, stamping `completed_at`.
    pub fn mark_task_completed(&self, id: TaskId) -> anyhow::Result<()> {
        let now = ts(Utc::now());
        self.conn().execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id.to_string(), now],
        )?;
        Ok(())
    }

    /// completed -> reviewed (auto-approval at threshold).
    pub fn mark_task_reviewed(&self, id: TaskId) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE tasks SET status = 'reviewed', updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }

    /// completed/reviewed -> in_progress for a revision cycle; clears
    /// `completed_at` and keeps the assignee.
    pub fn reopen_task(&self, id: TaskId) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE tasks SET status = 'in_progress', completed_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Employee;
    use crate::model::EmployeeRole;

    #[test]
    fn intake_scan_orders_by_priority_then_age() {
        let store = Store::open_in_memory().unwrap();
        let low = Task::new("low", "", TaskPriority::Low);
        let critical = Task::new("critical", "", TaskPriority::Critical);
        let medium = Task::new("medium", "", TaskPriority::Medium);
        for t in [&low, &critical, &medium] {
            store.create_task(t).unwrap();
        }

        let pending = store.list_unassigned_pending().unwrap();
        let titles: Vec<_> = pending.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["critical", "medium", "low"]);
    }

    #[test]
    fn subtasks_do_not_appear_in_intake_scan() {
        let store = Store::open_in_memory().unwrap();
        let parent = Task::new("parent", "", TaskPriority::Medium);
        store.create_task(&parent).unwrap();
        let sub = Task::subtask_of(&parent, "sub", "");
        store.create_task(&sub).unwrap();

        let pending = store.list_unassigned_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, parent.id);
        assert_eq!(store.list_subtasks(parent.id).unwrap().len(), 1);
    }

    #[test]
    fn status_mutations_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let worker = uuid::Uuid::new_v4();
        let task = Task::new("t", "", TaskPriority::High);
        store.create_task(&task).unwrap();

        store.assign_task(task.id, worker).unwrap();
        let t = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.assigned_to, Some(worker));
        assert_eq!(store.count_in_progress(worker).unwrap(), 1);

        store.mark_task_completed(task.id).unwrap();
        let t = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.completed_at.is_some());

        store.reopen_task(task.id).unwrap();
        let t = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::InProgress);
        assert!(t.completed_at.is_none());
        assert_eq!(t.assigned_to, Some(worker));

        store.mark_task_completed(task.id).unwrap();
        store.mark_task_reviewed(task.id).unwrap();
        let t = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Reviewed);
        assert_eq!(store.count_finished_by(worker).unwrap(), 1);
    }

    #[test]
    fn manager_review_scan_sees_only_direct_reports() {
        let store = Store::open_in_memory().unwrap();
        let manager = Employee::new("m", EmployeeRole::Manager, vec![], None);
        let other_manager = Employee::new("m2", EmployeeRole::Manager, vec![], None);
        store.create_employee(&manager).unwrap();
        store.create_employee(&other_manager).unwrap();
        let mine = Employee::new("w1", EmployeeRole::Ic, vec![], Some(manager.id));
        let theirs = Employee::new("w2", EmployeeRole::Ic, vec![], Some(other_manager.id));
        store.create_employee(&mine).unwrap();
        store.create_employee(&theirs).unwrap();

        for worker in [mine.id, theirs.id] {
            let task = Task::new("t", "", TaskPriority::Medium);
            store.create_task(&task).unwrap();
            store.assign_task(task.id, worker).unwrap();
            store.mark_task_completed(task.id).unwrap();
        }

        let reviewable = store.list_completed_for_manager(manager.id).unwrap();
        assert_eq!(reviewable.len(), 1);
        assert_eq!(reviewable[0].assigned_to, Some(mine.id));
    }
}
