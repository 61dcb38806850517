//! Role loops: the generic scheduler and the four role agents.
//!
//! Every role instantiates the same control pattern: on each tick the
//! ordered proactive checks run first (throttled ones gated by their
//! configured probability), the role's heartbeat is refreshed, and then
//! the loop waits a bounded time for exactly one mailbox event. Proactive
//! work always progresses even under total message loss, and an event
//! burst cannot starve the scans because only one event is consumed per
//! tick. No check or handler error ever terminates a loop.

pub mod ceo;
pub mod hr;
pub mod ic;
pub mod manager;

pub use ceo::CeoAgent;
pub use hr::HrAgent;
pub use ic::IcAgent;
pub use manager::ManagerAgent;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cache::StateCache;
use crate::config::OrgConfig;
use crate::mailbox::MailboxHub;
use crate::model::{EmployeeId, EmployeeRole, OrgEvent};
use crate::reasoning::ReasoningService;
use crate::store::SharedStore;
use crate::supervisor::{LoopLifecycle, StartOutcome};
use crate::throttle::ProbabilityGate;

/// Mailbox token of the HR loop. HR is a system role, not an employee row.
pub const HR_TOKEN: &str = "role:hr";

/// Mailbox token for an employee-backed role loop.
pub fn employee_token(id: EmployeeId) -> String {
    format!("role:{}", id)
}

/// One proactive check: its name and per-tick activation probability.
/// Probabilities come from configuration; `1.0` means every tick.
#[derive(Debug, Clone, Copy)]
pub struct CheckDef {
    pub name: &'static str,
    pub probability: f64,
}

/// A role's plug-ins into the generic loop.
#[async_trait]
pub trait RoleAgent: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> String;

    /// Mailbox token this role listens on.
    fn token(&self) -> String;

    /// Bounded reactive-wait timeout for this role.
    fn wait_timeout(&self) -> Duration;

    /// Ordered proactive checks. Each must be idempotent and tolerate
    /// finding nothing to do.
    fn checks(&self) -> Vec<CheckDef>;

    /// Run one named proactive check.
    async fn run_check(&self, name: &str) -> anyhow::Result<()>;

    /// Handle one reactive event.
    async fn handle(&self, event: OrgEvent) -> anyhow::Result<()>;

    /// Refresh liveness (cache `last_active` and, for employee-backed
    /// roles, the store heartbeat the supervisor watches).
    async fn heartbeat(&self);
}

/// Everything a role loop needs, injected once at construction. No
/// global singletons: tests swap any piece for a double.
pub struct OrgContext {
    pub store: SharedStore,
    pub mailbox: Arc<MailboxHub>,
    pub cache: Arc<StateCache>,
    pub reasoner: Arc<dyn ReasoningService>,
    pub gate: Arc<dyn ProbabilityGate>,
    pub config: OrgConfig,
}

pub type SharedContext = Arc<OrgContext>;

/// What one tick of the loop decided.
#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    /// The mailbox channel closed: a newer listener displaced this loop.
    Displaced,
}

/// Run one tick: proactive checks, heartbeat, bounded reactive wait.
async fn tick(
    agent: &dyn RoleAgent,
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<OrgEvent>,
    gate: &dyn ProbabilityGate,
) -> TickOutcome {
    for check in agent.checks() {
        if !gate.fires(check.probability) {
            continue;
        }
        if let Err(e) = agent.run_check(check.name).await {
            tracing::warn!(role = %agent.name(), check = check.name, error = %e, "proactive check failed");
        }
    }

    agent.heartbeat().await;

    match tokio::time::timeout(agent.wait_timeout(), rx.recv()).await {
        Ok(Some(event)) => {
            tracing::debug!(role = %agent.name(), event = event.kind(), "dispatching reactive event");
            if let Err(e) = agent.handle(event).await {
                tracing::warn!(role = %agent.name(), error = %e, "event handler failed");
            }
            TickOutcome::Continue
        }
        Ok(None) => TickOutcome::Displaced,
        // Timeout: loop straight back into the proactive checks.
        Err(_) => TickOutcome::Continue,
    }
}

/// Run a role loop until its listener is displaced or the process ends.
pub async fn run_role_loop(agent: Arc<dyn RoleAgent>, mailbox: Arc<MailboxHub>, gate: Arc<dyn ProbabilityGate>) {
    let token = agent.token();
    let mut rx = mailbox.listen(&token);
    tracing::info!(role = %agent.name(), token, "role loop started");
    loop {
        if tick(agent.as_ref(), &mut rx, gate.as_ref()).await == TickOutcome::Displaced {
            tracing::info!(role = %agent.name(), "listener displaced, loop exiting");
            return;
        }
    }
}

/// In-process loop lifecycle endpoint: owns the join handles of spawned
/// role loops and answers `start` requests from the self-healing
/// supervisor. Starting an employee whose loop is still running reports
/// `AlreadyRunning`; loop entry re-derives state from the store, so a
/// racing restart is harmless.
pub struct LoopRegistry {
    ctx: SharedContext,
    handles: Mutex<HashMap<EmployeeId, JoinHandle<()>>>,
    self_ref: Weak<LoopRegistry>,
}

impl LoopRegistry {
    pub fn new(ctx: SharedContext) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            ctx,
            handles: Mutex::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    fn lifecycle(&self) -> anyhow::Result<Arc<dyn LoopLifecycle>> {
        self.self_ref
            .upgrade()
            .map(|arc| arc as Arc<dyn LoopLifecycle>)
            .ok_or_else(|| anyhow::anyhow!("loop registry dropped"))
    }

    fn agent_for(&self, id: EmployeeId, role: EmployeeRole) -> anyhow::Result<Arc<dyn RoleAgent>> {
        let ctx = self.ctx.clone();
        Ok(match role {
            EmployeeRole::Ic => Arc::new(IcAgent::new(ctx, id)),
            EmployeeRole::Manager => Arc::new(ManagerAgent::new(ctx, id, self.lifecycle()?)),
            EmployeeRole::Ceo => Arc::new(CeoAgent::new(ctx, id)),
        })
    }

    /// Spawn the HR loop. HR is not employee-backed, so it is not
    /// reachable through [`LoopLifecycle::start`].
    pub async fn spawn_hr(&self) -> anyhow::Result<()> {
        let agent: Arc<dyn RoleAgent> = Arc::new(HrAgent::new(self.ctx.clone(), self.lifecycle()?));
        let mailbox = self.ctx.mailbox.clone();
        let gate = self.ctx.gate.clone();
        tokio::spawn(run_role_loop(agent, mailbox, gate));
        Ok(())
    }

    /// Number of live loops (finished handles are pruned).
    pub async fn live_loops(&self) -> usize {
        let mut handles = self.handles.lock().await;
        handles.retain(|_, handle| !handle.is_finished());
        handles.len()
    }
}

#[async_trait]
impl LoopLifecycle for LoopRegistry {
    async fn start(&self, role_id: EmployeeId) -> anyhow::Result<StartOutcome> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&role_id) {
            if !handle.is_finished() {
                return Ok(StartOutcome::AlreadyRunning);
            }
        }

        let Some(employee) = self.ctx.store.get_employee(role_id)? else {
            anyhow::bail!("cannot start loop for unknown employee {}", role_id);
        };
        if employee.status != crate::model::EmployeeStatus::Active {
            anyhow::bail!("cannot start loop for terminated employee {}", role_id);
        }

        let agent = self.agent_for(role_id, employee.role)?;
        let mailbox = self.ctx.mailbox.clone();
        let gate = self.ctx.gate.clone();
        let handle = tokio::spawn(run_role_loop(agent, mailbox, gate));
        handles.insert(role_id, handle);
        Ok(StartOutcome::Started)
    }
}
