//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::lifecycle::{self, TaskEvent};
use crate::model::{
    Deliverable, Employee, OrgEvent, Report, Task, TaskPriority,
};
use crate::roles::{employee_token, SharedContext, HR_TOKEN};

/// Shared application state.
pub struct AppState {
    pub ctx: SharedContext,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", post(submit_task))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/revision", post(request_revision))
        .route("/api/employees", get(list_employees))
        .route("/api/reports", get(list_reports))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionRequest {
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<Task>,
    pub deliverables: Vec<Deliverable>,
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    tracing::error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /health - Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// POST /api/tasks - Submit work to the organization. The task lands in
/// the store first; the mailbox ping only shortens HR's reaction time.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<Task>), (StatusCode, String)> {
    if req.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Title cannot be empty".to_string()));
    }

    let task = Task::new(
        req.title,
        req.description,
        req.priority.unwrap_or(TaskPriority::Medium),
    );
    state.ctx.store.create_task(&task).map_err(internal)?;
    state
        .ctx
        .mailbox
        .deliver(HR_TOKEN, OrgEvent::TaskSubmitted { task_id: task.id });

    tracing::info!(task = %task.id, "task submitted");
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks - Most recent tasks.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, (StatusCode, String)> {
    let tasks = state
        .ctx
        .store
        .list_tasks(query.limit.unwrap_or(50))
        .map_err(internal)?;
    Ok(Json(tasks))
}

/// GET /api/tasks/:id - One task with its subtasks and deliverables.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskDetail>, (StatusCode, String)> {
    let task = state
        .ctx
        .store
        .get_task(id)
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Task {} not found", id)))?;
    let subtasks = state.ctx.store.list_subtasks(id).map_err(internal)?;
    let deliverables = state
        .ctx
        .store
        .list_deliverables_for_task(id)
        .map_err(internal)?;
    Ok(Json(TaskDetail { task, subtasks, deliverables }))
}

/// POST /api/tasks/:id/revision - Manual revision request for a
/// completed or reviewed task.
async fn request_revision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RevisionRequest>,
) -> Result<Json<Task>, (StatusCode, String)> {
    if req.feedback.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Feedback cannot be empty".to_string()));
    }

    let task = state
        .ctx
        .store
        .get_task(id)
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Task {} not found", id)))?;

    lifecycle::apply(
        &task,
        &TaskEvent::RequestRevision { feedback: req.feedback.clone() },
        state.ctx.config.review.approval_threshold,
    )
    .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    state.ctx.store.reopen_task(id).map_err(internal)?;
    if let Some(deliverable) = state.ctx.store.latest_deliverable(id).map_err(internal)? {
        state
            .ctx
            .store
            .attach_feedback(deliverable.id, &req.feedback)
            .map_err(internal)?;
    }
    if let Some(worker) = task.assigned_to {
        state.ctx.mailbox.deliver(
            &employee_token(worker),
            OrgEvent::RevisionRequested { task_id: id, feedback: req.feedback },
        );
    }

    let reopened = state
        .ctx
        .store
        .get_task(id)
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Task {} not found", id)))?;
    tracing::info!(task = %id, "manual revision requested");
    Ok(Json(reopened))
}

/// GET /api/employees - The whole roster, terminated included.
async fn list_employees(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Employee>>, (StatusCode, String)> {
    let employees = state.ctx.store.list_employees().map_err(internal)?;
    Ok(Json(employees))
}

/// GET /api/reports - Most recent manager reports.
async fn list_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Report>>, (StatusCode, String)> {
    let reports = state
        .ctx
        .store
        .list_reports(query.limit.unwrap_or(50))
        .map_err(internal)?;
    Ok(Json(reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateCache;
    use crate::config::OrgConfig;
    use crate::mailbox::MailboxHub;
    use crate::model::{EmployeeRole, TaskStatus};
    use crate::reasoning::testing::FailingReasoner;
    use crate::roles::OrgContext;
    use crate::store::Store;
    use crate::throttle::NeverGate;

    fn state() -> Arc<AppState> {
        let ctx: SharedContext = Arc::new(OrgContext {
            store: Arc::new(Store::open_in_memory().unwrap()),
            mailbox: Arc::new(MailboxHub::new()),
            cache: Arc::new(StateCache::new(3600)),
            reasoner: Arc::new(FailingReasoner),
            gate: Arc::new(NeverGate),
            config: OrgConfig::default(),
        });
        Arc::new(AppState { ctx })
    }

    #[tokio::test]
    async fn submission_stores_the_task_and_pings_hr() {
        let state = state();
        let mut hr_rx = state.ctx.mailbox.listen(HR_TOKEN);

        let (status, Json(task)) = submit_task(
            State(state.clone()),
            Json(SubmitTaskRequest {
                title: "Build a login form".into(),
                description: "with validation".into(),
                priority: Some(TaskPriority::High),
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task.status, TaskStatus::Pending);
        let stored = state.ctx.store.get_task(task.id).unwrap().unwrap();
        assert_eq!(stored.priority, TaskPriority::High);

        match hr_rx.try_recv().unwrap() {
            OrgEvent::TaskSubmitted { task_id } => assert_eq!(task_id, task.id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn submission_survives_a_missing_hr_listener() {
        let state = state();
        let (status, _) = submit_task(
            State(state.clone()),
            Json(SubmitTaskRequest {
                title: "orphan".into(),
                description: String::new(),
                priority: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        // HR's next intake scan finds it in the store.
        assert_eq!(state.ctx.store.list_unassigned_pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let err = submit_task(
            State(state()),
            Json(SubmitTaskRequest {
                title: "   ".into(),
                description: String::new(),
                priority: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn task_detail_includes_subtasks_and_deliverables() {
        let state = state();
        let worker = Employee::new("w", EmployeeRole::Ic, vec![], None);
        state.ctx.store.create_employee(&worker).unwrap();
        let task = Task::new("t", "d", TaskPriority::Medium);
        state.ctx.store.create_task(&task).unwrap();
        let sub = Task::subtask_of(&task, "s", "");
        state.ctx.store.create_task(&sub).unwrap();
        let d = Deliverable::new(sub.id, "text", "v1", worker.id, 2);
        state.ctx.store.create_deliverable(&d).unwrap();

        let Json(detail) = get_task(State(state.clone()), Path(task.id)).await.unwrap();
        assert_eq!(detail.task.id, task.id);
        assert_eq!(detail.subtasks.len(), 1);
        // Deliverables hang off subtasks, not the parent.
        assert!(detail.deliverables.is_empty());

        let Json(sub_detail) = get_task(State(state), Path(sub.id)).await.unwrap();
        assert_eq!(sub_detail.deliverables.len(), 1);
    }

    #[tokio::test]
    async fn unknown_task_is_a_404() {
        let err = get_task(State(state()), Path(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_revision_reopens_and_notifies_the_worker() {
        let state = state();
        let worker = Employee::new("w", EmployeeRole::Ic, vec![], None);
        state.ctx.store.create_employee(&worker).unwrap();
        let task = Task::new("t", "d", TaskPriority::Medium);
        state.ctx.store.create_task(&task).unwrap();
        state.ctx.store.assign_task(task.id, worker.id).unwrap();
        let d = Deliverable::new(task.id, "text", "v1", worker.id, 2);
        state.ctx.store.create_deliverable(&d).unwrap();
        state.ctx.store.mark_task_completed(task.id).unwrap();
        let mut worker_rx = state.ctx.mailbox.listen(&employee_token(worker.id));

        let Json(reopened) = request_revision(
            State(state.clone()),
            Path(task.id),
            Json(RevisionRequest { feedback: "tighten the copy".into() }),
        )
        .await
        .unwrap();

        assert_eq!(reopened.status, TaskStatus::InProgress);
        let d = state.ctx.store.latest_deliverable(task.id).unwrap().unwrap();
        assert_eq!(d.feedback.as_deref(), Some("tighten the copy"));
        match worker_rx.try_recv().unwrap() {
            OrgEvent::RevisionRequested { task_id, feedback } => {
                assert_eq!(task_id, task.id);
                assert_eq!(feedback, "tighten the copy");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn revision_of_a_pending_task_is_a_conflict() {
        let state = state();
        let task = Task::new("t", "d", TaskPriority::Medium);
        state.ctx.store.create_task(&task).unwrap();

        let err = request_revision(
            State(state),
            Path(task.id),
            Json(RevisionRequest { feedback: "nope".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);
    }
}
