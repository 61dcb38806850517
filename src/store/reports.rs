//! Manager-to-CEO report CRUD.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_enum, parse_id, parse_ts, ts, Store};
use crate::model::{EmployeeId, Report, ReportStatus};
use uuid::Uuid;

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: parse_id(&row.get::<_, String>("id")?)?,
        manager_id: parse_id(&row.get::<_, String>("manager_id")?)?,
        ceo_id: parse_id(&row.get::<_, String>("ceo_id")?)?,
        period_start: parse_ts(&row.get::<_, String>("period_start")?)?,
        period_end: parse_ts(&row.get::<_, String>("period_end")?)?,
        status: parse_enum::<ReportStatus>(&row.get::<_, String>("status")?)?,
        content: row.get("content")?,
        response: row.get("response")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
    })
}

impl Store {
    pub fn create_report(&self, report: &Report) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT INTO reports (id, manager_id, ceo_id, period_start, period_end,
                                  status, content, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                report.id.to_string(),
                report.manager_id.to_string(),
                report.ceo_id.to_string(),
                ts(report.period_start),
                ts(report.period_end),
                report.status.to_string(),
                report.content,
                report.response,
                ts(report.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_report(&self, id: Uuid) -> anyhow::Result<Option<Report>> {
        let conn = self.conn();
        let report = conn
            .query_row(
                "SELECT * FROM reports WHERE id = ?1",
                params![id.to_string()],
                row_to_report,
            )
            .optional()?;
        Ok(report)
    }

    pub fn list_reports(&self, limit: usize) -> anyhow::Result<Vec<Report>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM reports ORDER BY created_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], row_to_report)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Reports awaiting a CEO response; the CEO's proactive scan.
    pub fn list_submitted_reports(&self, ceo_id: EmployeeId) -> anyhow::Result<Vec<Report>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM reports WHERE ceo_id = ?1 AND status = 'submitted'
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![ceo_id.to_string()], row_to_report)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The manager's most recent report, used to pick the next period's
    /// start bound.
    pub fn latest_report_for_manager(
        &self,
        manager_id: EmployeeId,
    ) -> anyhow::Result<Option<Report>> {
        let conn = self.conn();
        let report = conn
            .query_row(
                "SELECT * FROM reports WHERE manager_id = ?1
                 ORDER BY period_end DESC LIMIT 1",
                params![manager_id.to_string()],
                row_to_report,
            )
            .optional()?;
        Ok(report)
    }

    pub fn respond_to_report(&self, id: Uuid, response: &str) -> anyhow::Result<()> {
        self.conn().execute(
            "UPDATE reports SET status = 'responded', response = ?2 WHERE id = ?1",
            params![id.to_string(), response],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn submit_then_respond() {
        let store = Store::open_in_memory().unwrap();
        let manager = Uuid::new_v4();
        let ceo = Uuid::new_v4();
        let now = Utc::now();
        let report = Report::new(manager, ceo, now - Duration::days(7), now, "weekly summary");
        store.create_report(&report).unwrap();

        let open = store.list_submitted_reports(ceo).unwrap();
        assert_eq!(open.len(), 1);

        store.respond_to_report(report.id, "keep shipping").unwrap();
        assert!(store.list_submitted_reports(ceo).unwrap().is_empty());

        let back = store.get_report(report.id).unwrap().unwrap();
        assert_eq!(back.status, ReportStatus::Responded);
        assert_eq!(back.response.as_deref(), Some("keep shipping"));
    }

    #[test]
    fn latest_report_tracks_period_end() {
        let store = Store::open_in_memory().unwrap();
        let manager = Uuid::new_v4();
        let ceo = Uuid::new_v4();
        let now = Utc::now();
        let older = Report::new(manager, ceo, now - Duration::days(14), now - Duration::days(7), "a");
        let newer = Report::new(manager, ceo, now - Duration::days(7), now, "b");
        store.create_report(&older).unwrap();
        store.create_report(&newer).unwrap();

        let latest = store.latest_report_for_manager(manager).unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }
}
