//! orgloop entry point: open the store, boot the role loops, serve HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use orgloop::api::{router, AppState};
use orgloop::cache::StateCache;
use orgloop::config::OrgConfig;
use orgloop::mailbox::MailboxHub;
use orgloop::model::{Employee, EmployeeRole};
use orgloop::reasoning::{DisabledReasoner, OpenRouterReasoner, ReasoningService};
use orgloop::roles::{LoopRegistry, OrgContext, SharedContext};
use orgloop::store::{SharedStore, Store};
use orgloop::supervisor::LoopLifecycle;
use orgloop::throttle::{ProbabilityGate, SeededGate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orgloop=info,tower_http=info")),
        )
        .init();

    let config_path = std::env::var("ORGLOOP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("orgloop.json"));
    let config = OrgConfig::load(&config_path);

    let store: SharedStore = Arc::new(Store::open(&config.db_path)?);

    let reasoner: Arc<dyn ReasoningService> = match config.openrouter_api_key.clone() {
        Some(key) => Arc::new(OpenRouterReasoner::new(key, config.model.clone())),
        None => {
            tracing::warn!("OPENROUTER_API_KEY not set, running on deterministic fallbacks");
            Arc::new(DisabledReasoner)
        }
    };

    let gate: Arc<dyn ProbabilityGate> = match config.gate_seed {
        Some(seed) => Arc::new(SeededGate::from_seed(seed)),
        None => Arc::new(SeededGate::from_entropy()),
    };

    let ctx: SharedContext = Arc::new(OrgContext {
        store: store.clone(),
        mailbox: Arc::new(MailboxHub::new()),
        cache: Arc::new(StateCache::new(config.cache_ttl_secs)),
        reasoner,
        gate,
        config: config.clone(),
    });

    ensure_ceo(&store)?;

    let registry = LoopRegistry::new(ctx.clone());
    registry.spawn_hr().await?;
    resume_loops(&store, registry.as_ref()).await?;

    let state = Arc::new(AppState { ctx });
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("orgloop listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// The CEO is the one role that must exist before any report can be
/// filed. Idempotent across restarts.
fn ensure_ceo(store: &SharedStore) -> anyhow::Result<()> {
    if store.list_active_by_role(EmployeeRole::Ceo)?.is_empty() {
        let ceo = Employee::new("ceo", EmployeeRole::Ceo, vec!["leadership".to_string()], None);
        store.create_employee(&ceo)?;
        tracing::info!(id = %ceo.id, "created CEO");
    }
    Ok(())
}

/// Restart the loop of every active employee so work interrupted by the
/// previous shutdown resumes from the store.
async fn resume_loops(store: &SharedStore, registry: &LoopRegistry) -> anyhow::Result<()> {
    let mut resumed = 0;
    for role in [EmployeeRole::Ceo, EmployeeRole::Manager, EmployeeRole::Ic] {
        for employee in store.list_active_by_role(role)? {
            match registry.start(employee.id).await {
                Ok(_) => resumed += 1,
                Err(e) => {
                    tracing::warn!(id = %employee.id, error = %e, "could not resume role loop");
                }
            }
        }
    }
    tracing::info!(resumed, "resumed role loops");
    Ok(())
}
