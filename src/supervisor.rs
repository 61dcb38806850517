//! Self-healing supervisor.
//!
//! Loops die silently (crash, deploy, process restart) and nothing else
//! in the system is told. The supervisor is the substitute: a throttled
//! proactive check that scans subordinates with unfinished work, compares
//! their store heartbeat against a staleness window, and asks the loop
//! lifecycle endpoint to (re)start anything that looks dead. "Already
//! running" is success. Requests are de-duplicated per detection window
//! so a stuck loop cannot trigger a restart storm.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::model::{Employee, EmployeeId};
use crate::store::SharedStore;

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// The process boundary that owns loop lifecycle: given a role id, spawn
/// or resume its loop. Implemented by the in-process loop registry and by
/// test doubles.
#[async_trait]
pub trait LoopLifecycle: Send + Sync {
    async fn start(&self, role_id: EmployeeId) -> anyhow::Result<StartOutcome>;
}

/// Staleness sweep over a set of subordinates.
pub struct StalenessSupervisor {
    store: SharedStore,
    lifecycle: std::sync::Arc<dyn LoopLifecycle>,
    window: Duration,
    recent_requests: Mutex<HashMap<EmployeeId, DateTime<Utc>>>,
}

impl StalenessSupervisor {
    pub fn new(
        store: SharedStore,
        lifecycle: std::sync::Arc<dyn LoopLifecycle>,
        window_secs: i64,
    ) -> Self {
        Self {
            store,
            lifecycle,
            window: Duration::seconds(window_secs),
            recent_requests: Mutex::new(HashMap::new()),
        }
    }

    /// True when a restart was requested for `id` within the current
    /// detection window. Also records `now` when returning false.
    fn should_request(&self, id: EmployeeId, now: DateTime<Utc>) -> bool {
        let mut recent = self
            .recent_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match recent.get(&id) {
            Some(last) if now - *last < self.window => false,
            _ => {
                recent.insert(id, now);
                true
            }
        }
    }

    /// Sweep `subordinates`, issuing start requests for the stale ones.
    /// Returns how many requests were issued. Errors on individual
    /// subordinates are logged and skipped; the sweep always finishes.
    pub async fn sweep(&self, subordinates: &[Employee]) -> usize {
        let now = Utc::now();
        let mut issued = 0;
        for employee in subordinates {
            match self.sweep_one(employee, now).await {
                Ok(true) => issued += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id = %employee.id, error = %e, "staleness check failed, retrying next sweep");
                }
            }
        }
        issued
    }

    async fn sweep_one(&self, employee: &Employee, now: DateTime<Utc>) -> anyhow::Result<bool> {
        // Idle subordinates are allowed to be silent.
        if self.store.list_open_for(employee.id)?.is_empty() {
            return Ok(false);
        }

        // Staleness is judged on the store heartbeat, re-read here so a
        // caller holding an old roster cannot trigger spurious restarts.
        let Some(fresh) = self.store.get_employee(employee.id)? else {
            tracing::warn!(id = %employee.id, "subordinate with open work vanished from store");
            return Ok(false);
        };
        if now - fresh.updated_at <= self.window {
            return Ok(false);
        }

        if !self.should_request(employee.id, now) {
            return Ok(false);
        }

        match self.lifecycle.start(employee.id).await {
            Ok(StartOutcome::Started) => {
                tracing::info!(id = %employee.id, "restarted stale role loop");
                Ok(true)
            }
            Ok(StartOutcome::AlreadyRunning) => {
                // The loop beat us to it; success, not an error.
                tracing::debug!(id = %employee.id, "stale-looking loop was already running");
                Ok(true)
            }
            Err(e) => {
                // Allow a retry next window rather than waiting one out.
                self.recent_requests
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&employee.id);
                Err(e)
            }
        }
    }
}
