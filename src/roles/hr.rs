//! HR loop: intake of unassigned work, skill derivation, placement
//! through the hiring engine, and an org-wide staleness sweep.
//!
//! HR is a system role with no employee row, so its liveness lives only
//! in the state cache and it is never a supervision target itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{employee_token, CheckDef, RoleAgent, SharedContext, HR_TOKEN};
use crate::cache::{state_key, HrState};
use crate::hiring::HiringEngine;
use crate::model::{EmployeeRole, OrgEvent, Task};
use crate::reasoning::extract_json;
use crate::supervisor::{LoopLifecycle, StalenessSupervisor};

const CHECK_INTAKE_SCAN: &str = "intake_scan";
const CHECK_SUPERVISE: &str = "supervise";

const MAX_DERIVED_SKILLS: usize = 5;

pub struct HrAgent {
    ctx: SharedContext,
    lifecycle: Arc<dyn LoopLifecycle>,
    engine: HiringEngine,
    supervisor: StalenessSupervisor,
}

impl HrAgent {
    pub fn new(ctx: SharedContext, lifecycle: Arc<dyn LoopLifecycle>) -> Self {
        let engine = HiringEngine::new(
            ctx.store.clone(),
            ctx.reasoner.clone(),
            ctx.config.hiring.clone(),
        );
        let supervisor = StalenessSupervisor::new(
            ctx.store.clone(),
            lifecycle.clone(),
            ctx.config.staleness.hr_window_secs,
        );
        Self { ctx, lifecycle, engine, supervisor }
    }

    /// Place every unassigned pending top-level task.
    async fn intake_scan(&self) -> anyhow::Result<()> {
        let open = self.ctx.store.list_unassigned_pending()?;
        for task in &open {
            if let Err(e) = self.intake(task).await {
                tracing::warn!(task = %task.id, error = %e, "intake failed, retrying next scan");
            }
        }

        let state = HrState {
            open_intake: self
                .ctx
                .store
                .list_unassigned_pending()?
                .into_iter()
                .map(|t| t.id)
                .collect(),
        };
        if let Err(e) = self.ctx.cache.put(&state_key("hr"), &state).await {
            tracing::warn!(error = %e, "hr state cache write failed");
        }
        Ok(())
    }

    async fn intake(&self, task: &Task) -> anyhow::Result<()> {
        let skills = self.derive_skills(task).await;
        let Some(placement) = self.engine.place_task(task.id, &skills).await? else {
            // Claimed between listing and placement; nothing to do.
            return Ok(());
        };

        tracing::info!(
            task = %task.id,
            worker = %placement.worker,
            hired = placement.hired,
            "task placed"
        );
        self.ctx.mailbox.deliver(
            &employee_token(placement.worker),
            OrgEvent::TaskAssigned { task_id: task.id },
        );

        // Manager loop first so reviews are live before deliverables land.
        for role_id in [placement.manager, placement.worker] {
            if let Err(e) = self.lifecycle.start(role_id).await {
                tracing::warn!(id = %role_id, error = %e, "could not start role loop after placement");
            }
        }
        Ok(())
    }

    /// Derive the required skills for a task. The fallback keeps intake
    /// moving on keywords alone.
    async fn derive_skills(&self, task: &Task) -> Vec<String> {
        let prompt = format!(
            "List the 1 to {} professional skills needed for this task.\n\
             Task: {}\n{}\n\
             Answer with JSON only: [\"skill\", ...]",
            MAX_DERIVED_SKILLS, task.title, task.description
        );
        match self.ctx.reasoner.complete(&prompt).await {
            Ok(completion) => match extract_json::<Vec<String>>(&completion.text) {
                Ok(skills) if !skills.is_empty() => skills
                    .into_iter()
                    .map(|s| s.to_lowercase())
                    .take(MAX_DERIVED_SKILLS)
                    .collect(),
                Ok(_) | Err(_) => {
                    tracing::warn!(task = %task.id, "unusable skill list from model, using keywords");
                    Self::keyword_skills(task)
                }
            },
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "skill derivation call failed, using keywords");
                Self::keyword_skills(task)
            }
        }
    }

    fn keyword_skills(task: &Task) -> Vec<String> {
        let mut skills: Vec<String> = Vec::new();
        for word in task.title.split(|c: char| !c.is_alphanumeric()) {
            if word.len() < 4 {
                continue;
            }
            let word = word.to_lowercase();
            if !skills.contains(&word) {
                skills.push(word);
            }
            if skills.len() == MAX_DERIVED_SKILLS {
                break;
            }
        }
        skills
    }

    /// Org-wide staleness sweep: HR watches every active IC with the wide
    /// window, backstopping managers whose own loops are down.
    async fn supervise(&self) -> anyhow::Result<()> {
        let workers = self.ctx.store.list_active_by_role(EmployeeRole::Ic)?;
        let restarted = self.supervisor.sweep(&workers).await;
        if restarted > 0 {
            tracing::info!(restarted, "org-wide sweep restarted stale worker loops");
        }
        Ok(())
    }
}

#[async_trait]
impl RoleAgent for HrAgent {
    fn name(&self) -> String {
        "hr".to_string()
    }

    fn token(&self) -> String {
        HR_TOKEN.to_string()
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.timeouts.hr_secs)
    }

    fn checks(&self) -> Vec<CheckDef> {
        vec![
            CheckDef { name: CHECK_INTAKE_SCAN, probability: 1.0 },
            CheckDef {
                name: CHECK_SUPERVISE,
                probability: self.ctx.config.probabilities.supervise,
            },
        ]
    }

    async fn run_check(&self, name: &str) -> anyhow::Result<()> {
        match name {
            CHECK_INTAKE_SCAN => self.intake_scan().await,
            CHECK_SUPERVISE => self.supervise().await,
            other => anyhow::bail!("unknown check {}", other),
        }
    }

    async fn handle(&self, event: OrgEvent) -> anyhow::Result<()> {
        match event {
            OrgEvent::TaskSubmitted { task_id } => match self.ctx.store.get_task(task_id)? {
                Some(task) => self.intake(&task).await,
                None => {
                    tracing::warn!(task = %task_id, "submission event for unknown task");
                    Ok(())
                }
            },
            other => {
                tracing::debug!(role = "hr", event = other.kind(), "ignoring event");
                Ok(())
            }
        }
    }

    async fn heartbeat(&self) {
        self.ctx.cache.touch(&state_key("hr")).await;
    }
}
