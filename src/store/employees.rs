//! Employee CRUD and scans.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_enum, parse_id, parse_ts, ts, Store};
use crate::model::{Employee, EmployeeId, EmployeeRole, EmployeeStatus};

fn row_to_employee(row: &Row<'_>) -> rusqlite::Result<Employee> {
    let skills_raw: String = row.get("skills")?;
    let skills: Vec<String> = serde_json::from_str(&skills_raw).unwrap_or_default();
    Ok(Employee {
        id: parse_id(&row.get::<_, String>("id")?)?,
        name: row.get("name")?,
        role: parse_enum::<EmployeeRole>(&row.get::<_, String>("role")?)?,
        skills,
        status: parse_enum::<EmployeeStatus>(&row.get::<_, String>("status")?)?,
        manager_id: row
            .get::<_, Option<String>>("manager_id")?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

impl Store {
    /// Insert a new employee row.
    pub fn create_employee(&self, employee: &Employee) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO employees (id, name, role, skills, status, manager_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                employee.id.to_string(),
                employee.name,
                employee.role.to_string(),
                serde_json::to_string(&employee.skills)?,
                employee.status.to_string(),
                employee.manager_id.map(|id| id.to_string()),
                ts(employee.created_at),
                ts(employee.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_employee(&self, id: EmployeeId) -> anyhow::Result<Option<Employee>> {
        let conn = self.conn();
        let employee = conn
            .query_row(
                "SELECT * FROM employees WHERE id = ?1",
                params![id.to_string()],
                row_to_employee,
            )
            .optional()?;
        Ok(employee)
    }

    pub fn list_employees(&self) -> anyhow::Result<Vec<Employee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM employees ORDER BY created_at")?;
        let rows = stmt.query_map([], row_to_employee)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active employees of one role, oldest first.
    pub fn list_active_by_role(&self, role: EmployeeRole) -> anyhow::Result<Vec<Employee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM employees WHERE role = ?1 AND status = 'active' ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![role.to_string()], row_to_employee)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active ICs reporting to `manager_id`.
    pub fn list_direct_reports(&self, manager_id: EmployeeId) -> anyhow::Result<Vec<Employee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM employees
             WHERE manager_id = ?1 AND status = 'active'
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![manager_id.to_string()], row_to_employee)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of active direct reports under `manager_id`. Used by the
    /// hiring engine's least-loaded manager selection.
    pub fn direct_report_count(&self, manager_id: EmployeeId) -> anyhow::Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM employees WHERE manager_id = ?1 AND status = 'active'",
            params![manager_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Refresh `updated_at`. This is the store-side heartbeat the
    /// self-healing supervisor reads for staleness.
    pub fn touch_employee(&self, id: EmployeeId) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE employees SET updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Soft delete. Rows are never removed while tasks or deliverables
    /// reference them.
    /// Re-link a worker to a supervising manager.
    pub fn set_manager(&self, id: EmployeeId, manager_id: EmployeeId) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE employees SET manager_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), manager_id.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }

    pub fn terminate_employee(&self, id: EmployeeId) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE employees SET status = 'terminated', updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_read_back() {
        let store = Store::open_in_memory().unwrap();
        let manager = Employee::new("m", EmployeeRole::Manager, vec!["planning".into()], None);
        store.create_employee(&manager).unwrap();
        let ic = Employee::new("w", EmployeeRole::Ic, vec!["rust".into()], Some(manager.id));
        store.create_employee(&ic).unwrap();

        let got = store.get_employee(ic.id).unwrap().unwrap();
        assert_eq!(got.name, "w");
        assert_eq!(got.manager_id, Some(manager.id));
        assert_eq!(got.skills, vec!["rust".to_string()]);

        assert_eq!(store.direct_report_count(manager.id).unwrap(), 1);
        assert_eq!(store.list_active_by_role(EmployeeRole::Ic).unwrap().len(), 1);
    }

    #[test]
    fn termination_removes_from_active_scans() {
        let store = Store::open_in_memory().unwrap();
        let ic = Employee::new("w", EmployeeRole::Ic, vec![], None);
        store.create_employee(&ic).unwrap();
        store.terminate_employee(ic.id).unwrap();

        assert!(store.list_active_by_role(EmployeeRole::Ic).unwrap().is_empty());
        // The row itself survives the soft delete.
        assert!(store.get_employee(ic.id).unwrap().is_some());
    }

    #[test]
    fn touch_advances_updated_at() {
        let store = Store::open_in_memory().unwrap();
        let ic = Employee::new("w", EmployeeRole::Ic, vec![], None);
        store.create_employee(&ic).unwrap();
        let before = store.get_employee(ic.id).unwrap().unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.touch_employee(ic.id).unwrap();
        let after = store.get_employee(ic.id).unwrap().unwrap().updated_at;
        assert!(after > before);
    }
}
