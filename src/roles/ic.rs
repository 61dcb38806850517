//! Individual-contributor loop: pick up assigned work, decompose
//! top-level tasks, execute subtasks into deliverables, report upward.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{employee_token, CheckDef, RoleAgent, SharedContext};
use crate::cache::{state_key, WorkerState};
use crate::lifecycle::{self, TaskEvent};
use crate::model::{
    Deliverable, EmployeeId, EmployeeStatus, MemoryKind, MemoryEntry, OrgEvent, Task, TaskStatus,
};
use crate::reasoning::extract_json;

const CHECK_WORK_SCAN: &str = "work_scan";
const CHECK_MEMORY_BUILD: &str = "memory_build";

/// Cap on subtasks produced by one decomposition.
const MAX_SUBTASKS: usize = 5;

#[derive(Debug, Deserialize)]
struct SubtaskPlan {
    title: String,
    #[serde(default)]
    description: String,
}

pub struct IcAgent {
    ctx: SharedContext,
    employee_id: EmployeeId,
}

impl IcAgent {
    pub fn new(ctx: SharedContext, employee_id: EmployeeId) -> Self {
        Self { ctx, employee_id }
    }

    fn cache_key(&self) -> String {
        state_key(&self.employee_id.to_string())
    }

    /// Derived state, rebuilt from the store whenever the cache misses or
    /// the owning employee no longer validates.
    async fn load_state(&self) -> anyhow::Result<WorkerState> {
        let key = self.cache_key();
        if let Some(state) = self.ctx.cache.get::<WorkerState>(&key).await {
            let owner_valid = matches!(
                self.ctx.store.get_employee(self.employee_id)?,
                Some(e) if e.status == EmployeeStatus::Active
            );
            if owner_valid {
                return Ok(state);
            }
            self.ctx.cache.invalidate(&key).await;
        }
        let state = self.rebuild_state()?;
        if let Err(e) = self.ctx.cache.put(&key, &state).await {
            tracing::warn!(id = %self.employee_id, error = %e, "worker state cache write failed");
        }
        Ok(state)
    }

    fn rebuild_state(&self) -> anyhow::Result<WorkerState> {
        Ok(WorkerState {
            employee_id: Some(self.employee_id),
            current_tasks: self
                .ctx
                .store
                .list_open_for(self.employee_id)?
                .into_iter()
                .map(|t| t.id)
                .collect(),
            completed_tasks: self
                .ctx
                .store
                .list_finished_by(self.employee_id)?
                .into_iter()
                .map(|t| t.id)
                .collect(),
        })
    }

    /// Work through everything on this worker's plate. Idempotent: a task
    /// already decomposed or already delivered is advanced, not redone.
    async fn work_scan(&self) -> anyhow::Result<()> {
        // Validates the cached projection against the store (and drops it
        // when the owning employee no longer checks out).
        self.load_state().await?;

        let open = self.ctx.store.list_open_for(self.employee_id)?;
        for task in &open {
            if let Err(e) = self.advance(task).await {
                // Integrity gap or transient failure: abandon this task
                // for the tick, the next scan retries.
                tracing::warn!(task = %task.id, error = %e, "could not advance task this tick");
            }
        }

        let state = self.rebuild_state()?;
        if let Err(e) = self.ctx.cache.put(&self.cache_key(), &state).await {
            tracing::warn!(id = %self.employee_id, error = %e, "worker state cache write failed");
        }
        Ok(())
    }

    async fn advance(&self, task: &Task) -> anyhow::Result<()> {
        if task.is_top_level() {
            let subtasks = self.ctx.store.list_subtasks(task.id)?;
            if lifecycle::needs_decomposition(task, subtasks.len()) {
                return self.decompose(task).await;
            }
            return self.maybe_complete_parent(task, &subtasks).await;
        }
        self.execute(task).await
    }

    /// Break a top-level task into subtasks before any execution. Skipped
    /// when subtasks already exist, so a re-pickup after restart never
    /// duplicates the plan.
    async fn decompose(&self, task: &Task) -> anyhow::Result<()> {
        let prompt = format!(
            "Break this task into 2 to {} concrete subtasks.\n\
             Task: {}\n{}\n\
             Answer with JSON only: [{{\"title\": \"...\", \"description\": \"...\"}}]",
            MAX_SUBTASKS, task.title, task.description
        );

        let plans = match self.ctx.reasoner.complete(&prompt).await {
            Ok(completion) => match extract_json::<Vec<SubtaskPlan>>(&completion.text) {
                Ok(plans) if !plans.is_empty() => plans,
                Ok(_) | Err(_) => {
                    tracing::warn!(task = %task.id, "unusable decomposition from model, using single-step plan");
                    Self::fallback_plan(task)
                }
            },
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "decomposition call failed, using single-step plan");
                Self::fallback_plan(task)
            }
        };

        for plan in plans.into_iter().take(MAX_SUBTASKS) {
            let subtask = Task::subtask_of(task, plan.title, plan.description);
            self.ctx.store.create_task(&subtask)?;
            // Claim immediately: pending -> in_progress for this worker.
            let transition = lifecycle::apply(
                &subtask,
                &TaskEvent::Assign { employee: self.employee_id },
                lifecycle::APPROVAL_THRESHOLD,
            )?;
            debug_assert_eq!(transition.next, TaskStatus::InProgress);
            self.ctx.store.assign_task(subtask.id, self.employee_id)?;
        }

        let count = self.ctx.store.list_subtasks(task.id)?.len();
        self.remember(
            MemoryKind::Task,
            format!("decomposed '{}' into {} subtasks", task.title, count),
            0.5,
        );
        tracing::info!(task = %task.id, count, "decomposed top-level task");
        Ok(())
    }

    fn fallback_plan(task: &Task) -> Vec<SubtaskPlan> {
        vec![SubtaskPlan {
            title: format!("Implement: {}", task.title),
            description: task.description.clone(),
        }]
    }

    /// A top-level task completes once all of its subtasks are done.
    async fn maybe_complete_parent(&self, task: &Task, subtasks: &[Task]) -> anyhow::Result<()> {
        let all_done = subtasks
            .iter()
            .all(|s| matches!(s.status, TaskStatus::Completed | TaskStatus::Reviewed));
        if subtasks.is_empty() || !all_done {
            return Ok(());
        }
        if task.status != TaskStatus::InProgress {
            return Ok(());
        }

        let summary = subtasks
            .iter()
            .map(|s| format!("- {}", s.title))
            .collect::<Vec<_>>()
            .join("\n");
        let content = format!("All subtasks finished:\n{}", summary);
        self.deliver_and_complete(task, "summary", content, 0).await
    }

    /// Execute a subtask into a deliverable. Self-corrects after partial
    /// completion: a deliverable that already exists unevaluated means
    /// the earlier status write was lost, so only the status is repaired.
    async fn execute(&self, task: &Task) -> anyhow::Result<()> {
        if task.status == TaskStatus::Pending {
            // Claim a pending-but-assigned subtask before working it.
            let transition = lifecycle::apply(
                task,
                &TaskEvent::Assign { employee: self.employee_id },
                lifecycle::APPROVAL_THRESHOLD,
            )?;
            debug_assert_eq!(transition.next, TaskStatus::InProgress);
            self.ctx.store.assign_task(task.id, self.employee_id)?;
        }

        if let Some(existing) = self.ctx.store.latest_unevaluated(task.id)? {
            tracing::debug!(task = %task.id, deliverable = %existing.id, "repairing lost completion");
            self.ctx.store.mark_task_completed(task.id)?;
            self.notify_manager(task.id, existing.id);
            return Ok(());
        }

        let feedback = self
            .ctx
            .store
            .latest_deliverable(task.id)?
            .and_then(|d| d.feedback)
            .map(|f| format!("\nPrevious attempt feedback: {}", f))
            .unwrap_or_default();
        let context = self.memory_context()?;
        let prompt = format!(
            "Produce the work product for this task.\n\
             Task: {}\n{}{}\n{}",
            task.title, task.description, feedback, context
        );

        let (content, cost_cents) = match self.ctx.reasoner.complete(&prompt).await {
            Ok(completion) => {
                let cost = completion
                    .usage
                    .cost_cents(self.ctx.config.price_cents_per_1k_tokens);
                (completion.text, cost)
            }
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "execution call failed, producing placeholder deliverable");
                (
                    format!("Draft for '{}' (reasoning service unavailable; needs rework)", task.title),
                    0,
                )
            }
        };

        self.deliver_and_complete(task, "text", content, cost_cents).await
    }

    async fn deliver_and_complete(
        &self,
        task: &Task,
        kind: &str,
        content: String,
        cost_cents: i64,
    ) -> anyhow::Result<()> {
        let mut current = task.clone();
        current.status = TaskStatus::InProgress;
        let transition = lifecycle::apply(&current, &TaskEvent::Complete, lifecycle::APPROVAL_THRESHOLD)?;
        debug_assert_eq!(transition.next, TaskStatus::Completed);

        let deliverable = Deliverable::new(task.id, kind, content, self.employee_id, cost_cents);
        self.ctx.store.create_deliverable(&deliverable)?;
        self.ctx.store.mark_task_completed(task.id)?;

        self.remember(
            MemoryKind::Task,
            format!("completed '{}'", task.title),
            0.4,
        );
        self.notify_manager(task.id, deliverable.id);
        Ok(())
    }

    /// Tell the supervising manager a deliverable is ready. Advisory: the
    /// manager's review scan finds it anyway.
    fn notify_manager(&self, task_id: uuid::Uuid, deliverable_id: uuid::Uuid) {
        let manager = match self.ctx.store.get_employee(self.employee_id) {
            Ok(Some(me)) => me.manager_id,
            _ => None,
        };
        if let Some(manager) = manager {
            self.ctx.mailbox.deliver(
                &employee_token(manager),
                OrgEvent::DeliverableReady { task_id, deliverable_id },
            );
        }
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

    /// Memory writes are best-effort; losing one never blocks work.
    fn remember(&self, kind: MemoryKind, content: String, importance: f64) {
        let entry = MemoryEntry::new(self.employee_id, kind, content, importance);
        if let Err(e) = self.ctx.store.append_memory(&entry) {
            tracing::warn!(id = %self.employee_id, error = %e, "memory append failed");
        }
    }

    fn memory_build(&self) -> anyhow::Result<()> {
        let open = self.ctx.store.list_open_for(self.employee_id)?.len();
        let finished = self.ctx.store.count_finished_by(self.employee_id)?;
        self.remember(
            MemoryKind::Learning,
            format!("workload snapshot: {} open, {} finished", open, finished),
            0.3,
        );
        Ok(())
    }
}

#[async_trait]
impl RoleAgent for IcAgent {
    fn name(&self) -> String {
        format!("ic:{}", self.employee_id)
    }

    fn token(&self) -> String {
        employee_token(self.employee_id)
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.timeouts.ic_secs)
    }

    fn checks(&self) -> Vec<CheckDef> {
        vec![
            CheckDef { name: CHECK_WORK_SCAN, probability: 1.0 },
            CheckDef {
                name: CHECK_MEMORY_BUILD,
                probability: self.ctx.config.probabilities.memory_build,
            },
        ]
    }

    async fn run_check(&self, name: &str) -> anyhow::Result<()> {
        match name {
            CHECK_WORK_SCAN => self.work_scan().await,
            CHECK_MEMORY_BUILD => self.memory_build(),
            other => anyhow::bail!("unknown check {}", other),
        }
    }

    async fn handle(&self, event: OrgEvent) -> anyhow::Result<()> {
        match event {
            // Both paths converge on the scan, which is idempotent: a
            // task discovered twice is advanced once.
            OrgEvent::TaskAssigned { .. } | OrgEvent::RevisionRequested { .. } => {
                self.work_scan().await
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
