//! Probability gate for throttled proactive checks.
//!
//! Expensive or rarely-necessary checks (memory building, report
//! generation, staleness sweeps) run with a fixed per-tick activation
//! probability instead of every tick. The gate is injected into the role
//! loop so tests can script it and deployments can seed it; the
//! probability itself lives in configuration, never in the loop.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides whether a throttled check fires this tick.
pub trait ProbabilityGate: Send + Sync {
    /// Return true with probability `p` (clamped to `[0, 1]`).
    fn fires(&self, p: f64) -> bool;
}

/// RNG-backed gate. Seedable for reproducible runs.
pub struct SeededGate {
    rng: Mutex<StdRng>,
}

impl SeededGate {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ProbabilityGate for SeededGate {
    fn fires(&self, p: f64) -> bool {
        let p = p.clamp(0.0, 1.0);
        if p >= 1.0 {
            return true;
        }
        if p <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_bool(p)
    }
}

/// Gate that never fires for p < 1.0; unthrottled checks still run.
pub struct NeverGate;

impl ProbabilityGate for NeverGate {
    fn fires(&self, p: f64) -> bool {
        p >= 1.0
    }
}
