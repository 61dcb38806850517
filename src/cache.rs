//! State cache / consistency layer.
//!
//! Short-lived keyed projection of each role's derived state. The store
//! stays authoritative: everything in here is rebuildable at any time,
//! cache writes are non-fatal, and any cached decision with an external
//! side effect must re-validate against the store before committing
//! (hiring, cross-role notification). Reads refresh `last_active`, which
//! doubles as the in-process liveness heartbeat.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::{EmployeeId, TaskId};

/// Cached state of an IC's loop: what it is working on and what it has
/// shipped. Rebuilt from the store whenever missing or invalid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerState {
    pub employee_id: Option<EmployeeId>,
    pub current_tasks: Vec<TaskId>,
    pub completed_tasks: Vec<TaskId>,
}

/// Cached state of a manager's loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerState {
    pub employee_id: Option<EmployeeId>,
    pub pending_reviews: Vec<TaskId>,
    pub direct_reports: Vec<EmployeeId>,
}

/// Cached state of the HR loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HrState {
    pub open_intake: Vec<TaskId>,
}

/// Cached state of the CEO loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CeoState {
    pub employee_id: Option<EmployeeId>,
    pub open_reports: Vec<uuid::Uuid>,
}

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

/// TTL'd key-value projection of role state.
pub struct StateCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl StateCache {
    /// `ttl_secs` is typically an hour; tests use smaller windows.
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a cached value if present and fresh, refreshing
    /// `last_active`. Expired entries are treated as absent (the caller
    /// rebuilds from the store and re-caches).
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;
        if Utc::now() - entry.inserted_at > self.ttl {
            entries.remove(key);
            return None;
        }
        entry.last_active = Utc::now();
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                // Shape drift between deploys; drop and let the caller rebuild.
                tracing::warn!(key, error = %e, "cached state failed to decode, discarding");
                entries.remove(key);
                None
            }
        }
    }

    /// Store a value and refresh `last_active`. Serialization failures
    /// are returned for the caller to log; the store write has already
    /// succeeded, so this is never fatal.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        let now = Utc::now();
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                last_active: now,
            },
        );
        Ok(())
    }

    /// Refresh `last_active` without touching the value. A no-op when the
    /// key is absent.
    pub async fn touch(&self, key: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.last_active = Utc::now();
        }
    }

    /// In-process liveness heartbeat for a role, if cached.
    pub async fn last_active(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(key).map(|e| e.last_active)
    }

    /// Drop a key (e.g. the owning employee no longer validates against
    /// the store).
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

/// Cache key for a role's state, namespaced by role id.
pub fn state_key(role_id: &str) -> String {
    format!("role_state:{}", role_id)
}
