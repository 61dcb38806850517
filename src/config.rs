//! Runtime configuration.
//!
//! Every timeout, threshold and activation probability in the core loops
//! comes from here, never from literals in the loop bodies. Loaded from
//! an optional JSON file with environment variables as initial defaults;
//! a malformed file logs a warning and falls back to defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Bounded reactive-wait timeouts per role, in seconds (5–30s band).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopTimeouts {
    pub hr_secs: u64,
    pub manager_secs: u64,
    pub ic_secs: u64,
    pub ceo_secs: u64,
}

impl Default for LoopTimeouts {
    fn default() -> Self {
        Self {
            hr_secs: 5,
            manager_secs: 10,
            ic_secs: 5,
            ceo_secs: 30,
        }
    }
}

/// Per-tick activation probabilities for throttled proactive checks.
/// Checks not listed here run every tick (p = 1.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckProbabilities {
    /// Self-healing staleness sweep over subordinates.
    pub supervise: f64,
    /// Memory-building pass.
    pub memory_build: f64,
    /// Manager report generation.
    pub report: f64,
    /// CEO org-improvement scan.
    pub improvement: f64,
}

impl Default for CheckProbabilities {
    fn default() -> Self {
        Self {
            supervise: 0.1,
            memory_build: 0.1,
            report: 0.05,
            improvement: 0.1,
        }
    }
}

/// Assignment & hiring decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiringConfig {
    /// Minimum skill match for reuse.
    pub reuse_min_skill_match: f64,
    /// Maximum in-progress load for reuse.
    pub reuse_max_active_load: i64,
    /// Fixed cost of hiring a new worker, in cents, for the
    /// cost/experience trade-off.
    pub hire_cost_cents: i64,
    /// Trailing window for the recent-cost metric.
    pub cost_window_days: i64,
}

impl Default for HiringConfig {
    fn default() -> Self {
        Self {
            reuse_min_skill_match: 0.5,
            reuse_max_active_load: 3,
            hire_cost_cents: 2_000,
            cost_window_days: 30,
        }
    }
}

/// Evaluation thresholds for the review step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Score at or above this auto-approves (completed -> reviewed).
    pub approval_threshold: i64,
    /// Score strictly below this triggers an automatic revision request.
    /// Scores in between stay completed, eligible for a manual request.
    pub auto_revision_below: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 8,
            auto_revision_below: 6,
        }
    }
}

/// Staleness windows for the self-healing supervisor, by role depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Manager watching its own direct reports.
    pub manager_window_secs: i64,
    /// HR watching every IC in the org.
    pub hr_window_secs: i64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            manager_window_secs: 120,
            hr_window_secs: 600,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// HTTP bind address.
    pub bind_addr: String,
    /// OpenRouter API key; without one the roles fall back to their
    /// deterministic paths.
    pub openrouter_api_key: Option<String>,
    /// Model slug for reasoning calls.
    pub model: String,
    /// Price charged per 1k tokens, in cents, for cost attribution.
    pub price_cents_per_1k_tokens: i64,
    /// Role-state cache TTL.
    pub cache_ttl_secs: i64,
    /// Seed for the probability gate; None seeds from entropy.
    pub gate_seed: Option<u64>,
    /// Memory entries injected as prompt context, most recent first.
    pub memory_context_limit: usize,
    pub timeouts: LoopTimeouts,
    pub probabilities: CheckProbabilities,
    pub hiring: HiringConfig,
    pub review: ReviewConfig,
    pub staleness: StalenessConfig,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("orgloop.db"),
            bind_addr: "127.0.0.1:8700".to_string(),
            openrouter_api_key: None,
            model: "openai/gpt-4o-mini".to_string(),
            price_cents_per_1k_tokens: 1,
            cache_ttl_secs: 3_600,
            gate_seed: None,
            memory_context_limit: 10,
            timeouts: LoopTimeouts::default(),
            probabilities: CheckProbabilities::default(),
            hiring: HiringConfig::default(),
            review: ReviewConfig::default(),
            staleness: StalenessConfig::default(),
        }
    }
}

impl OrgConfig {
    /// Environment variables as initial defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("ORGLOOP_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(addr) = std::env::var("ORGLOOP_BIND") {
            config.bind_addr = addr;
        }
        config.openrouter_api_key = std::env::var("OPENROUTER_API_KEY").ok();
        if let Ok(model) = std::env::var("ORGLOOP_MODEL") {
            config.model = model;
        }
        if let Some(seed) = std::env::var("ORGLOOP_GATE_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.gate_seed = Some(seed);
        }
        config
    }

    /// Load from a JSON file, falling back to env defaults on any error.
    pub fn load(path: &PathBuf) -> Self {
        if !path.exists() {
            tracing::info!("no config file at {}, using environment defaults", path.display());
            return Self::from_env();
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<Self>(&raw).map_err(Into::into))
        {
            Ok(config) => {
                tracing::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("failed to load config from {}: {}, using defaults", path.display(), e);
                Self::from_env()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_bands() {
        let config = OrgConfig::default();
        assert_eq!(config.review.approval_threshold, 8);
        assert_eq!(config.hiring.reuse_max_active_load, 3);
        assert!(config.hiring.reuse_min_skill_match >= 0.5);
        for secs in [
            config.timeouts.hr_secs,
            config.timeouts.manager_secs,
            config.timeouts.ic_secs,
            config.timeouts.ceo_secs,
        ] {
            assert!((5..=30).contains(&secs));
        }
        assert!((120..=600).contains(&config.staleness.manager_window_secs));
    }

    #[test]
    fn partial_config_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"bind_addr": "0.0.0.0:9000", "review": {"approval_threshold": 7}}"#)
            .unwrap();

        let config = OrgConfig::load(&path);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.review.approval_threshold, 7);
        // Untouched sections keep their defaults.
        assert_eq!(config.hiring.reuse_max_active_load, 3);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        let config = OrgConfig::load(&path);
        assert_eq!(config.review.approval_threshold, 8);
    }
}
