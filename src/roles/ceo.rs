//! CEO loop: respond to manager reports and run occasional
//! org-improvement scans that feed the CEO's own memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{employee_token, CheckDef, RoleAgent, SharedContext};
use crate::cache::{state_key, CeoState};
use crate::model::{EmployeeId, EmployeeRole, MemoryEntry, MemoryKind, OrgEvent, Report};

const CHECK_REPORT_REVIEW: &str = "report_review";
const CHECK_IMPROVEMENT: &str = "improvement";

pub struct CeoAgent {
    ctx: SharedContext,
    employee_id: EmployeeId,
}

impl CeoAgent {
    pub fn new(ctx: SharedContext, employee_id: EmployeeId) -> Self {
        Self { ctx, employee_id }
    }

    fn cache_key(&self) -> String {
        state_key(&self.employee_id.to_string())
    }

    /// Respond to every report awaiting a response. A report that fails
    /// stays submitted and the next scan retries it.
    async fn report_review(&self) -> anyhow::Result<()> {
        let open = self.ctx.store.list_submitted_reports(self.employee_id)?;
        for report in &open {
            if let Err(e) = self.respond(report).await {
                tracing::warn!(report = %report.id, error = %e, "report response failed, retrying next scan");
            }
        }

        let state = CeoState {
            employee_id: Some(self.employee_id),
            open_reports: self
                .ctx
                .store
                .list_submitted_reports(self.employee_id)?
                .into_iter()
                .map(|r| r.id)
                .collect(),
        };
        if let Err(e) = self.ctx.cache.put(&self.cache_key(), &state).await {
            tracing::warn!(id = %self.employee_id, error = %e, "ceo state cache write failed");
        }
        Ok(())
    }

    async fn respond(&self, report: &Report) -> anyhow::Result<()> {
        let context = self.memory_context()?;
        let prompt = format!(
            "You are the CEO. A manager sent this report, answer with a \
             short directive for the coming period.\n\
             Report ({} to {}):\n{}\n{}",
            report.period_start.format("%Y-%m-%d"),
            report.period_end.format("%Y-%m-%d"),
            report.content,
            context
        );
        let response = match self.ctx.reasoner.complete(&prompt).await {
            Ok(completion) => completion.text,
            Err(e) => {
                tracing::warn!(report = %report.id, error = %e, "response call failed, using canned directive");
                "Acknowledged. Keep the team focused on the open work.".to_string()
            }
        };

        self.ctx.store.respond_to_report(report.id, &response)?;
        self.remember(
            MemoryKind::Meeting,
            format!("responded to report from manager {}", report.manager_id),
            0.5,
        );
        tracing::info!(report = %report.id, "report responded");
        Ok(())
    }

    /// Occasional backlog snapshot, stored as a learning for future
    /// report responses.
    fn improvement(&self) -> anyhow::Result<()> {
        let unassigned = self.ctx.store.list_unassigned_pending()?.len();
        let workers = self.ctx.store.list_active_by_role(EmployeeRole::Ic)?;
        let managers = self.ctx.store.list_active_by_role(EmployeeRole::Manager)?;
        let mut in_flight = 0i64;
        for worker in &workers {
            in_flight += self.ctx.store.count_in_progress(worker.id)?;
        }

        self.remember(
            MemoryKind::Learning,
            format!(
                "org snapshot: {} unassigned, {} in flight, {} workers under {} managers",
                unassigned,
                in_flight,
                workers.len(),
                managers.len()
            ),
            0.6,
        );
        Ok(())
    }

    fn memory_context(&self) -> anyhow::Result<String> {
        let memories = self
            .ctx
            .store
            .recent_memories(self.employee_id, self.ctx.config.memory_context_limit)?;
        if memories.is_empty() {
            return Ok(String::new());
        }
        let lines = memories
            .iter()
            .map(|m| format!("- {}", m.content))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Recent context:\n{}", lines))
    }

    fn remember(&self, kind: MemoryKind, content: String, importance: f64) {
        let entry = MemoryEntry::new(self.employee_id, kind, content, importance);
        if let Err(e) = self.ctx.store.append_memory(&entry) {
            tracing::warn!(id = %self.employee_id, error = %e, "memory append failed");
        }
    }
}

#[async_trait]
impl RoleAgent for CeoAgent {
    fn name(&self) -> String {
        format!("ceo:{}", self.employee_id)
    }

    fn token(&self) -> String {
        employee_token(self.employee_id)
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.timeouts.ceo_secs)
    }

    fn checks(&self) -> Vec<CheckDef> {
        vec![
            CheckDef { name: CHECK_REPORT_REVIEW, probability: 1.0 },
            CheckDef {
                name: CHECK_IMPROVEMENT,
                probability: self.ctx.config.probabilities.improvement,
            },
        ]
    }

    async fn run_check(&self, name: &str) -> anyhow::Result<()> {
        match name {
            CHECK_REPORT_REVIEW => self.report_review().await,
            CHECK_IMPROVEMENT => self.improvement(),
            other => anyhow::bail!("unknown check {}", other),
        }
    }

    async fn handle(&self, event: OrgEvent) -> anyhow::Result<()> {
        match event {
            OrgEvent::ReportSubmitted { report_id } => {
                match self.ctx.store.get_report(report_id)? {
                    Some(report) => self.respond(&report).await,
                    None => {
                        tracing::warn!(report = %report_id, "submission event for unknown report");
                        Ok(())
                    }
                }
            }
            other => {
                tracing::debug!(role = %self.name(), event = other.kind(), "ignoring event");
                Ok(())
            }
        }
    }

    async fn heartbeat(&self) {
        self.ctx.cache.touch(&self.cache_key()).await;
        if let Err(e) = self.ctx.store.touch_employee(self.employee_id) {
            tracing::warn!(id = %self.employee_id, error = %e, "store heartbeat failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateCache;
    use crate::config::OrgConfig;
    use crate::mailbox::MailboxHub;
    use crate::model::{Employee, ReportStatus};
    use crate::reasoning::testing::{FailingReasoner, ScriptedReasoner};
    use crate::reasoning::ReasoningService;
    use crate::roles::OrgContext;
    use crate::store::Store;
    use crate::throttle::NeverGate;
    use chrono::{Duration as ChronoDuration, Utc};

    fn context(reasoner: Arc<dyn ReasoningService>) -> SharedContext {
        Arc::new(OrgContext {
            store: Arc::new(Store::open_in_memory().unwrap()),
            mailbox: Arc::new(MailboxHub::new()),
            cache: Arc::new(StateCache::new(3600)),
            reasoner,
            gate: Arc::new(NeverGate),
            config: OrgConfig::default(),
        })
    }

    fn org(ctx: &SharedContext) -> (Employee, Employee) {
        let ceo = Employee::new("ceo", EmployeeRole::Ceo, vec![], None);
        ctx.store.create_employee(&ceo).unwrap();
        let manager = Employee::new("m", EmployeeRole::Manager, vec![], None);
        ctx.store.create_employee(&manager).unwrap();
        (ceo, manager)
    }

    fn submitted_report(ctx: &SharedContext, ceo: &Employee, manager: &Employee) -> Report {
        let now = Utc::now();
        let report = Report::new(
            manager.id,
            ceo.id,
            now - ChronoDuration::days(7),
            now,
            "Team of 2: 5 tasks finished.",
        );
        ctx.store.create_report(&report).unwrap();
        report
    }

    #[tokio::test]
    async fn scan_responds_to_open_reports() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec![
            "Good pace. Prioritize the review backlog next week.",
        ])));
        let (ceo, manager) = org(&ctx);
        let report = submitted_report(&ctx, &ceo, &manager);

        CeoAgent::new(ctx.clone(), ceo.id).report_review().await.unwrap();

        let back = ctx.store.get_report(report.id).unwrap().unwrap();
        assert_eq!(back.status, ReportStatus::Responded);
        assert_eq!(
            back.response.as_deref(),
            Some("Good pace. Prioritize the review backlog next week.")
        );
        assert!(ctx.store.list_submitted_reports(ceo.id).unwrap().is_empty());
        assert_eq!(ctx.store.count_memories(ceo.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn dead_reasoning_service_still_closes_the_report() {
        let ctx = context(Arc::new(FailingReasoner));
        let (ceo, manager) = org(&ctx);
        let report = submitted_report(&ctx, &ceo, &manager);

        CeoAgent::new(ctx.clone(), ceo.id).report_review().await.unwrap();

        let back = ctx.store.get_report(report.id).unwrap().unwrap();
        assert_eq!(back.status, ReportStatus::Responded);
        assert!(back.response.unwrap().starts_with("Acknowledged."));
    }

    #[tokio::test]
    async fn submission_event_responds_to_just_that_report() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec!["Noted."])));
        let (ceo, manager) = org(&ctx);
        let report = submitted_report(&ctx, &ceo, &manager);
        let other = submitted_report(&ctx, &ceo, &manager);

        CeoAgent::new(ctx.clone(), ceo.id)
            .handle(OrgEvent::ReportSubmitted { report_id: report.id })
            .await
            .unwrap();

        assert_eq!(
            ctx.store.get_report(report.id).unwrap().unwrap().status,
            ReportStatus::Responded
        );
        assert_eq!(
            ctx.store.get_report(other.id).unwrap().unwrap().status,
            ReportStatus::Submitted
        );
    }

    #[tokio::test]
    async fn improvement_snapshot_lands_in_memory() {
        let ctx = context(Arc::new(FailingReasoner));
        let (ceo, _) = org(&ctx);
        let task = crate::model::Task::new("t", "", crate::model::TaskPriority::Low);
        ctx.store.create_task(&task).unwrap();

        CeoAgent::new(ctx.clone(), ceo.id).improvement().unwrap();

        let memories = ctx.store.recent_memories(ceo.id, 5).unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].kind, MemoryKind::Learning);
        assert!(memories[0].content.contains("1 unassigned"));
    }
}
