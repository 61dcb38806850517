//! Manager loop: review deliverables from direct reports, push back
//! with revision requests, keep stale report loops alive, and send
//! periodic reports up to the CEO.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{employee_token, CheckDef, RoleAgent, SharedContext};
use crate::cache::{state_key, ManagerState};
use crate::lifecycle::{self, SideEffect, TaskEvent};
use crate::model::{
    EmployeeId, EmployeeRole, MemoryEntry, MemoryKind, OrgEvent, Report, Task, TaskStatus,
};
use crate::reasoning::extract_json;
use crate::supervisor::{LoopLifecycle, StalenessSupervisor};

const CHECK_REVIEW_SCAN: &str = "review_scan";
const CHECK_SUPERVISE: &str = "supervise";
const CHECK_REPORT: &str = "report";

/// Default report period when a manager has never reported before.
const FIRST_PERIOD_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
struct Evaluation {
    score: i64,
    #[serde(default)]
    feedback: String,
}

pub struct ManagerAgent {
    ctx: SharedContext,
    employee_id: EmployeeId,
    supervisor: StalenessSupervisor,
}

impl ManagerAgent {
    pub fn new(ctx: SharedContext, employee_id: EmployeeId, lifecycle: Arc<dyn LoopLifecycle>) -> Self {
        let supervisor = StalenessSupervisor::new(
            ctx.store.clone(),
            lifecycle,
            ctx.config.staleness.manager_window_secs,
        );
        Self { ctx, employee_id, supervisor }
    }

    fn cache_key(&self) -> String {
        state_key(&self.employee_id.to_string())
    }

    /// Evaluate every completed task from this manager's reports. Tasks
    /// whose latest deliverable is already scored are skipped, so a
    /// re-scan never double-reviews.
    async fn review_scan(&self) -> anyhow::Result<()> {
        let completed = self.ctx.store.list_completed_for_manager(self.employee_id)?;
        for task in &completed {
            if let Err(e) = self.review(task).await {
                tracing::warn!(task = %task.id, error = %e, "review failed, retrying next scan");
            }
        }

        let state = ManagerState {
            employee_id: Some(self.employee_id),
            pending_reviews: completed.iter().map(|t| t.id).collect(),
            direct_reports: self
                .ctx
                .store
                .list_direct_reports(self.employee_id)?
                .into_iter()
                .map(|e| e.id)
                .collect(),
        };
        if let Err(e) = self.ctx.cache.put(&self.cache_key(), &state).await {
            tracing::warn!(id = %self.employee_id, error = %e, "manager state cache write failed");
        }
        Ok(())
    }

    async fn review(&self, task: &Task) -> anyhow::Result<()> {
        let Some(deliverable) = self.ctx.store.latest_unevaluated(task.id)? else {
            // Everything scored: the only work left is repairing a
            // status write lost after the evaluation landed.
            return self.repair_evaluation(task);
        };

        let (score, feedback) = self.score(task, &deliverable.content).await;
        self.ctx
            .store
            .record_evaluation(deliverable.id, self.employee_id, score, Some(&feedback))?;

        let transition = lifecycle::apply(
            task,
            &TaskEvent::Evaluate { score },
            self.ctx.config.review.approval_threshold,
        )?;
        match transition.effect {
            SideEffect::Approved { score } => {
                self.ctx.store.mark_task_reviewed(task.id)?;
                tracing::info!(task = %task.id, score, "deliverable approved");
            }
            SideEffect::RecordFeedback { score } => {
                if score < self.ctx.config.review.auto_revision_below {
                    self.request_revision(task, &feedback)?;
                    tracing::info!(task = %task.id, score, "deliverable sent back for revision");
                } else {
                    // Middle band: stays completed, awaiting a manual call.
                    tracing::info!(task = %task.id, score, "deliverable held for manual review");
                }
            }
            other => anyhow::bail!("unexpected evaluation effect {:?}", other),
        }

        self.remember(
            MemoryKind::Task,
            format!("scored '{}' at {}", task.title, score),
            0.4,
        );
        Ok(())
    }

    /// Self-correct after partial completion: an evaluation can land and
    /// the follow-up status write be lost. Re-apply the recorded score so
    /// the scan converges on the right status instead of skipping the
    /// task forever. The held-for-manual band is already in its durable
    /// state, so re-applying it is a no-op.
    fn repair_evaluation(&self, task: &Task) -> anyhow::Result<()> {
        if task.status != TaskStatus::Completed {
            return Ok(());
        }
        let Some(deliverable) = self.ctx.store.latest_deliverable(task.id)? else {
            return Ok(());
        };
        let Some(score) = deliverable.evaluation_score else {
            return Ok(());
        };

        let transition = lifecycle::apply(
            task,
            &TaskEvent::Evaluate { score },
            self.ctx.config.review.approval_threshold,
        )?;
        match transition.effect {
            SideEffect::Approved { .. } => {
                self.ctx.store.mark_task_reviewed(task.id)?;
                tracing::info!(task = %task.id, score, "repaired lost approval write");
            }
            SideEffect::RecordFeedback { .. } if score < self.ctx.config.review.auto_revision_below => {
                let feedback = deliverable
                    .feedback
                    .clone()
                    .unwrap_or_else(|| "Needs rework.".to_string());
                self.request_revision(task, &feedback)?;
                tracing::info!(task = %task.id, score, "repaired lost revision request");
            }
            _ => {}
        }
        Ok(())
    }

    /// Score a deliverable 1..=10. When the reasoning service is down the
    /// fallback lands in the hold-for-manual band rather than approving
    /// or rejecting work nobody looked at.
    async fn score(&self, task: &Task, content: &str) -> (i64, String) {
        let prompt = format!(
            "Evaluate this deliverable against its task on a 1-10 scale.\n\
             Task: {}\n{}\nDeliverable:\n{}\n\
             Answer with JSON only: {{\"score\": 7, \"feedback\": \"...\"}}",
            task.title, task.description, content
        );
        match self.ctx.reasoner.complete(&prompt).await {
            Ok(completion) => match extract_json::<Evaluation>(&completion.text) {
                Ok(eval) => (eval.score.clamp(1, 10), eval.feedback),
                Err(e) => {
                    tracing::warn!(task = %task.id, error = %e, "unusable evaluation from model");
                    self.fallback_score()
                }
            },
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "evaluation call failed");
                self.fallback_score()
            }
        }
    }

    fn fallback_score(&self) -> (i64, String) {
        (
            (self.ctx.config.review.auto_revision_below + self.ctx.config.review.approval_threshold) / 2,
            "Automated evaluation unavailable; held for manual review.".to_string(),
        )
    }

    fn request_revision(&self, task: &Task, feedback: &str) -> anyhow::Result<()> {
        let transition = lifecycle::apply(
            task,
            &TaskEvent::RequestRevision { feedback: feedback.to_string() },
            self.ctx.config.review.approval_threshold,
        )?;
        debug_assert!(matches!(transition.effect, SideEffect::ReopenForRevision { .. }));

        self.ctx.store.reopen_task(task.id)?;
        if let Some(deliverable) = self.ctx.store.latest_deliverable(task.id)? {
            self.ctx.store.attach_feedback(deliverable.id, feedback)?;
        }
        if let Some(worker) = task.assigned_to {
            self.ctx.mailbox.deliver(
                &employee_token(worker),
                OrgEvent::RevisionRequested {
                    task_id: task.id,
                    feedback: feedback.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Staleness sweep over direct reports.
    async fn supervise(&self) -> anyhow::Result<()> {
        let reports = self.ctx.store.list_direct_reports(self.employee_id)?;
        let restarted = self.supervisor.sweep(&reports).await;
        if restarted > 0 {
            tracing::info!(manager = %self.employee_id, restarted, "restarted stale report loops");
        }
        Ok(())
    }

    /// Summarize the period since the last report and submit it to the
    /// CEO. Skipped when no CEO exists yet.
    async fn report(&self) -> anyhow::Result<()> {
        let ceo = match self.ctx.store.list_active_by_role(EmployeeRole::Ceo)?.into_iter().next() {
            Some(ceo) => ceo,
            None => {
                tracing::debug!(manager = %self.employee_id, "no CEO to report to");
                return Ok(());
            }
        };

        let now = Utc::now();
        let period_start = self
            .ctx
            .store
            .latest_report_for_manager(self.employee_id)?
            .map(|r| r.period_end)
            .unwrap_or_else(|| now - chrono::Duration::days(FIRST_PERIOD_DAYS));

        let reports = self.ctx.store.list_direct_reports(self.employee_id)?;
        let mut finished = 0i64;
        let mut in_flight = 0i64;
        for report in &reports {
            finished += self.ctx.store.count_finished_by(report.id)?;
            in_flight += self.ctx.store.count_in_progress(report.id)?;
        }
        let awaiting_review = self.ctx.store.list_completed_for_manager(self.employee_id)?.len();

        let content = format!(
            "Team of {}: {} tasks finished, {} in flight, {} awaiting review.",
            reports.len(),
            finished,
            in_flight,
            awaiting_review
        );
        let report = Report::new(self.employee_id, ceo.id, period_start, now, content);
        self.ctx.store.create_report(&report)?;
        self.ctx.mailbox.deliver(
            &employee_token(ceo.id),
            OrgEvent::ReportSubmitted { report_id: report.id },
        );
        tracing::info!(manager = %self.employee_id, report = %report.id, "report submitted");
        Ok(())
    }

    fn remember(&self, kind: MemoryKind, content: String, importance: f64) {
        let entry = MemoryEntry::new(self.employee_id, kind, content, importance);
        if let Err(e) = self.ctx.store.append_memory(&entry) {
            tracing::warn!(id = %self.employee_id, error = %e, "memory append failed");
        }
    }
}

#[async_trait]
impl RoleAgent for ManagerAgent {
    fn name(&self) -> String {
        format!("manager:{}", self.employee_id)
    }

    fn token(&self) -> String {
        employee_token(self.employee_id)
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.timeouts.manager_secs)
    }

    fn checks(&self) -> Vec<CheckDef> {
        vec![
            CheckDef { name: CHECK_REVIEW_SCAN, probability: 1.0 },
            CheckDef {
                name: CHECK_SUPERVISE,
                probability: self.ctx.config.probabilities.supervise,
            },
            CheckDef {
                name: CHECK_REPORT,
                probability: self.ctx.config.probabilities.report,
            },
        ]
    }

    async fn run_check(&self, name: &str) -> anyhow::Result<()> {
        match name {
            CHECK_REVIEW_SCAN => self.review_scan().await,
            CHECK_SUPERVISE => self.supervise().await,
            CHECK_REPORT => self.report().await,
            other => anyhow::bail!("unknown check {}", other),
        }
    }

    async fn handle(&self, event: OrgEvent) -> anyhow::Result<()> {
        match event {
            OrgEvent::DeliverableReady { task_id, .. } => {
                match self.ctx.store.get_task(task_id)? {
                    Some(task) => self.review(&task).await,
                    None => {
                        tracing::warn!(task = %task_id, "deliverable-ready for unknown task");
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
    use crate::model::{Deliverable, Employee, ReportStatus, TaskPriority};
    use crate::reasoning::testing::{FailingReasoner, ScriptedReasoner};
    use crate::reasoning::ReasoningService;
    use crate::roles::OrgContext;
    use crate::store::{SharedStore, Store};
    use crate::supervisor::StartOutcome;
    use crate::throttle::NeverGate;
    use std::sync::Mutex;

    struct NullLifecycle;

    #[async_trait]
    impl LoopLifecycle for NullLifecycle {
        async fn start(&self, _role_id: EmployeeId) -> anyhow::Result<StartOutcome> {
            Ok(StartOutcome::Started)
        }
    }

    struct RecordingLifecycle(Mutex<Vec<EmployeeId>>);

    #[async_trait]
    impl LoopLifecycle for RecordingLifecycle {
        async fn start(&self, role_id: EmployeeId) -> anyhow::Result<StartOutcome> {
            self.0.lock().unwrap().push(role_id);
            Ok(StartOutcome::Started)
        }
    }

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

    fn team(store: &SharedStore) -> (Employee, Employee) {
        let manager = Employee::new("m", EmployeeRole::Manager, vec![], None);
        store.create_employee(&manager).unwrap();
        let worker = Employee::new("w", EmployeeRole::Ic, vec![], Some(manager.id));
        store.create_employee(&worker).unwrap();
        (manager, worker)
    }

    fn completed_task(store: &SharedStore, worker: &Employee, content: &str) -> Task {
        let task = Task::new("t", "d", TaskPriority::Medium);
        store.create_task(&task).unwrap();
        store.assign_task(task.id, worker.id).unwrap();
        let d = Deliverable::new(task.id, "text", content, worker.id, 5);
        store.create_deliverable(&d).unwrap();
        store.mark_task_completed(task.id).unwrap();
        store.get_task(task.id).unwrap().unwrap()
    }

    fn agent(ctx: &SharedContext, manager: &Employee) -> ManagerAgent {
        ManagerAgent::new(ctx.clone(), manager.id, Arc::new(NullLifecycle))
    }

    #[tokio::test]
    async fn high_score_approves_the_task() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 9, "feedback": "solid"}"#,
        ])));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "good work");

        agent(&ctx, &manager).review_scan().await.unwrap();

        let reviewed = ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(reviewed.status, TaskStatus::Reviewed);
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        assert_eq!(d.evaluation_score, Some(9));
        assert_eq!(d.evaluated_by, Some(manager.id));
    }

    #[tokio::test]
    async fn low_score_reopens_and_notifies_the_worker() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 3, "feedback": "missing the validation logic"}"#,
        ])));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "thin work");
        let mut worker_rx = ctx.mailbox.listen(&employee_token(worker.id));

        agent(&ctx, &manager).review_scan().await.unwrap();

        let reopened = ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(reopened.status, TaskStatus::InProgress);
        assert_eq!(reopened.assigned_to, Some(worker.id));

        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        assert_eq!(d.feedback.as_deref(), Some("missing the validation logic"));

        match worker_rx.try_recv().unwrap() {
            OrgEvent::RevisionRequested { task_id, feedback } => {
                assert_eq!(task_id, task.id);
                assert_eq!(feedback, "missing the validation logic");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn middle_band_stays_completed_for_manual_review() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 7, "feedback": "acceptable but rough"}"#,
        ])));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "ok work");

        agent(&ctx, &manager).review_scan().await.unwrap();

        let held = ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(held.status, TaskStatus::Completed);
        // Scored, so the next scan does not re-review it.
        assert!(ctx.store.latest_unevaluated(task.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn fallback_score_never_approves_or_rejects() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "unseen work");

        agent(&ctx, &manager).review_scan().await.unwrap();

        let held = ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(held.status, TaskStatus::Completed);
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        let score = d.evaluation_score.unwrap();
        assert!(score >= ctx.config.review.auto_revision_below);
        assert!(score < ctx.config.review.approval_threshold);
    }

    #[tokio::test]
    async fn lost_approval_write_is_repaired_by_the_next_scan() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "approved work");
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        // Evaluation landed, then the status write was lost.
        ctx.store.record_evaluation(d.id, manager.id, 9, Some("solid")).unwrap();

        agent(&ctx, &manager).review_scan().await.unwrap();

        assert_eq!(
            ctx.store.get_task(task.id).unwrap().unwrap().status,
            TaskStatus::Reviewed
        );
        // The recorded evaluation is untouched.
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        assert_eq!(d.evaluation_score, Some(9));
        assert_eq!(d.feedback.as_deref(), Some("solid"));
    }

    #[tokio::test]
    async fn lost_revision_request_is_repaired_by_the_next_scan() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "rejected work");
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        ctx.store.record_evaluation(d.id, manager.id, 3, Some("redo")).unwrap();
        let mut worker_rx = ctx.mailbox.listen(&employee_token(worker.id));

        agent(&ctx, &manager).review_scan().await.unwrap();

        let reopened = ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(reopened.status, TaskStatus::InProgress);
        match worker_rx.try_recv().unwrap() {
            OrgEvent::RevisionRequested { task_id, feedback } => {
                assert_eq!(task_id, task.id);
                assert_eq!(feedback, "redo");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn held_band_task_is_stable_across_scans() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "held work");
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        ctx.store.record_evaluation(d.id, manager.id, 7, Some("rough")).unwrap();

        let agent = agent(&ctx, &manager);
        agent.review_scan().await.unwrap();
        agent.review_scan().await.unwrap();

        // Completed-with-feedback is the durable manual-review state.
        let held = ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(held.status, TaskStatus::Completed);
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        assert_eq!(d.feedback.as_deref(), Some("rough"));
    }

    #[tokio::test]
    async fn rescan_does_not_double_review() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 7, "feedback": "fine"}"#,
        ])));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "once");
        let agent = agent(&ctx, &manager);

        agent.review_scan().await.unwrap();
        // Scripted reasoner is exhausted; a second evaluation attempt
        // would fall back and overwrite the feedback.
        agent.review_scan().await.unwrap();

        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        assert_eq!(d.feedback.as_deref(), Some("fine"));
    }

    #[tokio::test]
    async fn deliverable_ready_event_reviews_just_that_task() {
        let ctx = context(Arc::new(ScriptedReasoner::new(vec![
            r#"{"score": 8, "feedback": "ship it"}"#,
        ])));
        let (manager, worker) = team(&ctx.store);
        let task = completed_task(&ctx.store, &worker, "event-driven");
        let d = ctx.store.latest_deliverable(task.id).unwrap().unwrap();

        agent(&ctx, &manager)
            .handle(OrgEvent::DeliverableReady { task_id: task.id, deliverable_id: d.id })
            .await
            .unwrap();

        assert_eq!(
            ctx.store.get_task(task.id).unwrap().unwrap().status,
            TaskStatus::Reviewed
        );
    }

    #[tokio::test]
    async fn report_covers_the_period_since_the_last_one() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, worker) = team(&ctx.store);
        let ceo = Employee::new("ceo", EmployeeRole::Ceo, vec![], None);
        ctx.store.create_employee(&ceo).unwrap();
        let task = completed_task(&ctx.store, &worker, "done");
        ctx.store.mark_task_reviewed(task.id).unwrap();
        let mut ceo_rx = ctx.mailbox.listen(&employee_token(ceo.id));

        let agent = agent(&ctx, &manager);
        agent.report().await.unwrap();

        let first = ctx.store.latest_report_for_manager(manager.id).unwrap().unwrap();
        assert_eq!(first.status, ReportStatus::Submitted);
        assert_eq!(first.ceo_id, ceo.id);
        assert!(first.content.contains("1 tasks finished"));
        match ceo_rx.try_recv().unwrap() {
            OrgEvent::ReportSubmitted { report_id } => assert_eq!(report_id, first.id),
            other => panic!("unexpected event {:?}", other),
        }

        // The next report starts where this one ended.
        agent.report().await.unwrap();
        let second = ctx.store.latest_report_for_manager(manager.id).unwrap().unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(second.period_start, first.period_end);
    }

    #[tokio::test]
    async fn report_without_a_ceo_is_skipped() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, _) = team(&ctx.store);
        agent(&ctx, &manager).report().await.unwrap();
        assert!(ctx.store.list_reports(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn supervise_restarts_only_stale_busy_reports() {
        let ctx = context(Arc::new(FailingReasoner));
        let (manager, worker) = team(&ctx.store);
        let task = Task::new("open", "", TaskPriority::Medium);
        ctx.store.create_task(&task).unwrap();
        ctx.store.assign_task(task.id, worker.id).unwrap();
        // Backdate the worker heartbeat past the staleness window.
        ctx.store
            .conn()
            .execute(
                "UPDATE employees SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![
                    worker.id.to_string(),
                    (Utc::now() - chrono::Duration::hours(1)).to_rfc3339()
                ],
            )
            .unwrap();

        let lifecycle = Arc::new(RecordingLifecycle(Mutex::new(Vec::new())));
        let agent = ManagerAgent::new(ctx.clone(), manager.id, lifecycle.clone());
        agent.supervise().await.unwrap();

        assert_eq!(*lifecycle.0.lock().unwrap(), vec![worker.id]);
    }
}
