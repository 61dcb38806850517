//! Assignment & hiring decision engine.
//!
//! Given the skills a unit of work needs, decide whether to reuse an
//! existing worker or hire a new one, then place the work. The reasoning
//! service may refine the choice among eligible candidates, but every
//! path degrades to a deterministic rule: task intake never blocks on a
//! decision failure.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::config::HiringConfig;
use crate::lifecycle::{self, SideEffect, TaskEvent};
use crate::model::{Employee, EmployeeId, EmployeeRole, Task, TaskId, TaskStatus};
use crate::reasoning::{extract_json, ReasoningService};
use crate::store::SharedStore;

/// Outcome of the reuse-or-hire decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentDecision {
    Reuse(EmployeeId),
    Hire,
}

/// One scored candidate for reuse.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub employee: Employee,
    pub skill_match: f64,
    pub active_load: i64,
    pub experience: i64,
    pub recent_cost_cents: i64,
}

impl Candidate {
    /// Average recent spend per finished unit of work. Fresh workers
    /// with no history read as free.
    fn cost_per_unit(&self) -> i64 {
        self.recent_cost_cents / self.experience.max(1)
    }
}

/// Where a placed task ended up.
#[derive(Debug, Clone)]
pub struct Placement {
    pub worker: EmployeeId,
    pub hired: bool,
    pub manager: EmployeeId,
}

/// Substring-tolerant Jaccard overlap between required and held skills.
/// "react" matches "reactjs" in either direction; case-insensitive.
/// Empty requirements match anyone.
pub fn skill_match(required: &[String], held: &[String]) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    if held.is_empty() {
        return 0.0;
    }
    let matched = required
        .iter()
        .filter(|r| held.iter().any(|h| skills_overlap(r, h)))
        .count();
    let union = required.len() + held.len() - matched;
    matched as f64 / union as f64
}

fn skills_overlap(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

#[derive(Debug, Deserialize)]
struct ReuseVerdict {
    action: String,
    #[serde(default)]
    employee_id: Option<EmployeeId>,
}

/// The decision engine. Holds the store, the reasoning service and the
/// tuning thresholds; injected into HR's loop.
pub struct HiringEngine {
    store: SharedStore,
    reasoner: Arc<dyn ReasoningService>,
    config: HiringConfig,
}

impl HiringEngine {
    pub fn new(store: SharedStore, reasoner: Arc<dyn ReasoningService>, config: HiringConfig) -> Self {
        Self {
            store,
            reasoner,
            config,
        }
    }

    /// Profile every active IC against the required skills.
    pub fn candidates(&self, required_skills: &[String]) -> anyhow::Result<Vec<Candidate>> {
        let window_start = Utc::now() - Duration::days(self.config.cost_window_days);
        let mut out = Vec::new();
        for employee in self.store.list_active_by_role(EmployeeRole::Ic)? {
            let active_load = self.store.count_in_progress(employee.id)?;
            let experience =
                self.store.count_finished_by(employee.id)? + self.store.count_memories(employee.id)?;
            let recent_cost_cents = self.store.cost_since(employee.id, window_start)?;
            out.push(Candidate {
                skill_match: skill_match(required_skills, &employee.skills),
                employee,
                active_load,
                experience,
                recent_cost_cents,
            });
        }
        Ok(out)
    }

    fn eligible<'a>(&self, candidates: &'a [Candidate]) -> Vec<&'a Candidate> {
        candidates
            .iter()
            .filter(|c| {
                c.skill_match >= self.config.reuse_min_skill_match
                    && c.active_load <= self.config.reuse_max_active_load
                    && c.cost_per_unit() <= self.config.hire_cost_cents
            })
            .collect()
    }

    /// Deterministic fallback: best skill match among workers with
    /// head-room, else hire.
    fn fallback(&self, candidates: &[Candidate]) -> AssignmentDecision {
        candidates
            .iter()
            .filter(|c| c.active_load < self.config.reuse_max_active_load)
            .max_by(|a, b| {
                a.skill_match
                    .partial_cmp(&b.skill_match)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.experience.cmp(&b.experience))
            })
            .map(|c| AssignmentDecision::Reuse(c.employee.id))
            .unwrap_or(AssignmentDecision::Hire)
    }

    /// Re-check the store before committing a reuse. Cached or
    /// model-suggested availability is never trusted for a side-effecting
    /// decision.
    fn validate_reuse(&self, id: EmployeeId) -> anyhow::Result<bool> {
        let Some(employee) = self.store.get_employee(id)? else {
            return Ok(false);
        };
        if employee.role != EmployeeRole::Ic || employee.status != crate::model::EmployeeStatus::Active {
            return Ok(false);
        }
        Ok(self.store.count_in_progress(id)? <= self.config.reuse_max_active_load)
    }

    /// The reuse-or-hire decision for a unit of work needing
    /// `required_skills`.
    pub async fn decide(&self, required_skills: &[String]) -> anyhow::Result<AssignmentDecision> {
        let candidates = self.candidates(required_skills)?;
        if candidates.is_empty() {
            return Ok(AssignmentDecision::Hire);
        }

        let eligible = self.eligible(&candidates);
        let decision = match eligible.len() {
            0 => AssignmentDecision::Hire,
            1 => AssignmentDecision::Reuse(eligible[0].employee.id),
            _ => self.refine(required_skills, &eligible, &candidates).await,
        };

        // Store re-validation guards the external side effect.
        if let AssignmentDecision::Reuse(id) = decision {
            if !self.validate_reuse(id)? {
                tracing::warn!(%id, "reuse candidate failed store re-validation, falling back");
                let fallback = self.fallback(&candidates);
                if let AssignmentDecision::Reuse(fb) = fallback {
                    if fb != id && self.validate_reuse(fb)? {
                        return Ok(AssignmentDecision::Reuse(fb));
                    }
                }
                return Ok(AssignmentDecision::Hire);
            }
        }
        Ok(decision)
    }

    /// Ask the reasoning service to pick among several eligible workers.
    /// Any failure degrades to the deterministic rule.
    async fn refine(
        &self,
        required_skills: &[String],
        eligible: &[&Candidate],
        all: &[Candidate],
    ) -> AssignmentDecision {
        let roster = eligible
            .iter()
            .map(|c| {
                format!(
                    "- id={} skills={:?} skill_match={:.2} active_load={} experience={} recent_cost_cents={}",
                    c.employee.id, c.employee.skills, c.skill_match, c.active_load, c.experience,
                    c.recent_cost_cents
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You staff work in a software organization. A task needs skills {:?}.\n\
             Candidate workers:\n{}\n\
             Hiring a new worker costs {} cents. Prefer reuse when a candidate fits.\n\
             Answer with JSON only: {{\"action\": \"reuse\", \"employee_id\": \"<id>\"}} or {{\"action\": \"hire\"}}",
            required_skills, roster, self.config.hire_cost_cents
        );

        match self.reasoner.complete(&prompt).await {
            Ok(completion) => match extract_json::<ReuseVerdict>(&completion.text) {
                Ok(verdict) if verdict.action == "reuse" => {
                    match verdict.employee_id {
                        Some(id) if eligible.iter().any(|c| c.employee.id == id) => {
                            AssignmentDecision::Reuse(id)
                        }
                        _ => {
                            tracing::warn!("model chose reuse without a valid candidate id");
                            self.fallback(all)
                        }
                    }
                }
                Ok(verdict) if verdict.action == "hire" => AssignmentDecision::Hire,
                Ok(verdict) => {
                    tracing::warn!(action = %verdict.action, "unknown staffing action from model");
                    self.fallback(all)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "staffing verdict unparseable, using fallback rule");
                    self.fallback(all)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "reasoning call failed, using fallback rule");
                self.fallback(all)
            }
        }
    }

    /// Return the least-loaded active manager, creating one if the org
    /// has none. Manager-before-worker ordering: callers hire managers
    /// through this before any IC is made available for work.
    pub fn ensure_manager(&self) -> anyhow::Result<Employee> {
        let managers = self.store.list_active_by_role(EmployeeRole::Manager)?;
        let mut best: Option<(i64, Employee)> = None;
        for manager in managers {
            let load = self.store.direct_report_count(manager.id)?;
            match &best {
                Some((least, _)) if *least <= load => {}
                _ => best = Some((load, manager)),
            }
        }
        if let Some((_, manager)) = best {
            return Ok(manager);
        }

        let count = self.store.list_employees()?.iter().filter(|e| e.role == EmployeeRole::Manager).count();
        let manager = Employee::new(
            format!("manager-{}", count + 1),
            EmployeeRole::Manager,
            vec!["management".to_string(), "planning".to_string()],
            None,
        );
        self.store.create_employee(&manager)?;
        tracing::info!(id = %manager.id, "no manager available, created one");
        Ok(manager)
    }

    /// Hire a new IC for `required_skills`, wired to a supervising
    /// manager before it is available for work.
    pub fn hire_ic(&self, required_skills: &[String]) -> anyhow::Result<(Employee, Employee)> {
        let manager = self.ensure_manager()?;
        let skills = if required_skills.is_empty() {
            vec!["generalist".to_string()]
        } else {
            required_skills.to_vec()
        };
        let count = self.store.list_employees()?.iter().filter(|e| e.role == EmployeeRole::Ic).count();
        let worker = Employee::new(
            format!("worker-{}", count + 1),
            EmployeeRole::Ic,
            skills,
            Some(manager.id),
        );
        self.store.create_employee(&worker)?;
        tracing::info!(id = %worker.id, manager = %manager.id, "hired new worker");
        Ok((worker, manager))
    }

    /// Give an idle new hire at most one currently-unassigned pending
    /// task. Returns the backfilled task, if any.
    pub fn backfill(&self, worker: EmployeeId) -> anyhow::Result<Option<Task>> {
        if !self.store.list_open_for(worker)?.is_empty() {
            return Ok(None);
        }
        let Some(task) = self.store.list_unassigned_pending()?.into_iter().next() else {
            return Ok(None);
        };
        self.assign(&task, worker)?;
        Ok(self.store.get_task(task.id)?)
    }

    fn assign(&self, task: &Task, worker: EmployeeId) -> anyhow::Result<()> {
        let transition = lifecycle::apply(
            task,
            &TaskEvent::Assign { employee: worker },
            lifecycle::APPROVAL_THRESHOLD,
        )?;
        debug_assert!(matches!(transition.effect, SideEffect::NotifyAssignee { .. }));
        self.store.assign_task(task.id, worker)?;
        Ok(())
    }

    /// Place a task: decide reuse-or-hire, hire if needed (manager
    /// first), and claim the task for the worker. Idempotent: a task that
    /// lost the race and is no longer pending-and-unassigned is left
    /// alone, and a fresh hire gets backfilled with some other pending
    /// task instead of sitting idle.
    pub async fn place_task(&self, task_id: TaskId, required_skills: &[String]) -> anyhow::Result<Option<Placement>> {
        let Some(task) = self.store.get_task(task_id)? else {
            anyhow::bail!("task {} not found at placement time", task_id);
        };
        if task.status != TaskStatus::Pending || task.assigned_to.is_some() {
            tracing::debug!(%task_id, status = %task.status, "task already placed, skipping");
            return Ok(None);
        }

        let decision = self.decide(required_skills).await?;
        let (worker, hired, manager) = match decision {
            AssignmentDecision::Reuse(id) => {
                let manager = match self.store.get_employee(id)?.and_then(|e| e.manager_id) {
                    Some(manager) => manager,
                    None => {
                        // An unlinked worker's finished work would have
                        // no reviewer; persist the link.
                        let manager = self.ensure_manager()?;
                        self.store.set_manager(id, manager.id)?;
                        manager.id
                    }
                };
                (id, false, manager)
            }
            AssignmentDecision::Hire => {
                let (worker, manager) = self.hire_ic(required_skills)?;
                (worker.id, true, manager.id)
            }
        };

        // The task may have been claimed by a racing scan between the
        // decision and the claim; last-write-wins is acceptable here, but
        // a vanished task should not strand a fresh hire.
        match self.store.get_task(task_id)? {
            Some(current) if current.status == TaskStatus::Pending && current.assigned_to.is_none() => {
                self.assign(&current, worker)?;
            }
            _ => {
                if hired {
                    self.backfill(worker)?;
                }
                return Ok(None);
            }
        }

        Ok(Some(Placement {
            worker,
            hired,
            manager,
        }))
    }
}
