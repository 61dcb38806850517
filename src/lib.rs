//! # orgloop
//!
//! An autonomous organization simulator: four cooperating role loops
//! (HR, manager, individual contributor, CEO) that accept work over
//! HTTP, decompose it, execute it through an external reasoning
//! service, review the results, and report upward. Every loop survives
//! its collaborators being down; the shared store is the only source of
//! truth and every loop restart rebuilds from it.
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/tasks
//!         │
//!         ▼
//!   ┌──────────┐  place   ┌────────────┐  review   ┌─────────┐
//!   │ HR loop  │ ───────> │  IC loops  │ ────────> │ Manager │
//!   │ (intake, │          │ (decompose,│  <──────  │  loops  │
//!   │  hiring) │          │  execute)  │  revise   └────┬────┘
//!   └──────────┘          └────────────┘       reports  │
//!                                                       ▼
//!                                                  ┌─────────┐
//!                                                  │CEO loop │
//!                                                  └─────────┘
//! ```
//!
//! ## Modules
//! - `roles`: the generic loop scheduler and the four role agents
//! - `lifecycle`: the task status state machine
//! - `hiring`: reuse-or-hire decisions and worker placement
//! - `supervisor`: heartbeat-based restart of dead loops
//! - `store`: SQLite persistence (tasks, employees, deliverables,
//!   memories, reports)
//! - `mailbox`: token-addressed in-process channels
//! - `reasoning`: the OpenRouter client and its fallbacks
//! - `cache`: TTL'd projections of role state

pub mod api;
pub mod cache;
pub mod config;
pub mod hiring;
pub mod lifecycle;
pub mod mailbox;
pub mod model;
pub mod reasoning;
pub mod roles;
pub mod store;
pub mod supervisor;
pub mod throttle;

pub use config::OrgConfig;
