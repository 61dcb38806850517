//! Core entity types shared by every role loop and the store.
//!
//! These mirror the five store tables (`employees`, `tasks`,
//! `deliverables`, `memories`, `reports`) plus the mailbox event type.
//! Timestamps are RFC 3339 UTC strings at the storage boundary; in-memory
//! they are `chrono::DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EmployeeId = Uuid;
pub type TaskId = Uuid;

/// Lifecycle status of a task. Transitions go through
/// [`crate::lifecycle`], never by direct assignment in handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Reviewed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Reviewed => write!(f, "reviewed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "reviewed" => Ok(Self::Reviewed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Task priority, used for intake ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown task priority: {}", other)),
        }
    }
}

/// A unit of work. Subtasks reference their parent through
/// `parent_task_id`; the tree is one level deep by invariant (a subtask's
/// parent is never itself a subtask).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<EmployeeId>,
    pub parent_task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new top-level pending task.
    pub fn new(title: impl Into<String>, description: impl Into<String>, priority: TaskPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            assigned_to: None,
            parent_task_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Create a subtask of `parent`.
    pub fn subtask_of(parent: &Task, title: impl Into<String>, description: impl Into<String>) -> Self {
        let mut task = Self::new(title, description, parent.priority);
        // One-level tree: hang subtasks of a subtask off the top-level parent.
        task.parent_task_id = Some(parent.parent_task_id.unwrap_or(parent.id));
        task
    }

    /// A task without a parent is a top-level task and must be decomposed
    /// before execution.
    pub fn is_top_level(&self) -> bool {
        self.parent_task_id.is_none()
    }
}

/// Organizational role of an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeRole {
    Ic,
    Manager,
    Ceo,
}

impl std::fmt::Display for EmployeeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ic => write!(f, "ic"),
            Self::Manager => write!(f, "manager"),
            Self::Ceo => write!(f, "ceo"),
        }
    }
}

impl std::str::FromStr for EmployeeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ic" => Ok(Self::Ic),
            "manager" => Ok(Self::Manager),
            "ceo" => Ok(Self::Ceo),
            other => Err(format!("unknown employee role: {}", other)),
        }
    }
}

/// Employment status. Employees are soft-deleted (`terminated`), never
/// removed while tasks or deliverables still reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Terminated,
}

impl std::fmt::Display for EmployeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for EmployeeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown employee status: {}", other)),
        }
    }
}

/// A worker, manager or CEO row. ICs report to exactly one manager;
/// managers and the CEO have no `manager_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub role: EmployeeRole,
    pub skills: Vec<String>,
    pub status: EmployeeStatus,
    pub manager_id: Option<EmployeeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    /// Create a new active employee.
    pub fn new(
        name: impl Into<String>,
        role: EmployeeRole,
        skills: Vec<String>,
        manager_id: Option<EmployeeId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            skills,
            status: EmployeeStatus::Active,
            manager_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Work product attached to a task. A task accumulates one deliverable
/// per revision cycle; only the latest unevaluated one is subject to
/// evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: Uuid,
    pub task_id: TaskId,
    pub kind: String,
    pub content: String,
    pub created_by: EmployeeId,
    pub evaluated_by: Option<EmployeeId>,
    pub evaluation_score: Option<i64>,
    pub feedback: Option<String>,
    /// Spend attributed to producing this deliverable, in cents. Feeds
    /// the hiring engine's trailing-cost metric.
    pub cost_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl Deliverable {
    /// Create a fresh, unevaluated deliverable.
    pub fn new(
        task_id: TaskId,
        kind: impl Into<String>,
        content: impl Into<String>,
        created_by: EmployeeId,
        cost_cents: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            kind: kind.into(),
            content: content.into(),
            created_by,
            evaluated_by: None,
            evaluation_score: None,
            feedback: None,
            cost_cents,
            created_at: Utc::now(),
        }
    }
}

/// Kind of a memory log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Meeting,
    Task,
    Learning,
    Interaction,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Meeting => write!(f, "meeting"),
            Self::Task => write!(f, "task"),
            Self::Learning => write!(f, "learning"),
            Self::Interaction => write!(f, "interaction"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meeting" => Ok(Self::Meeting),
            "task" => Ok(Self::Task),
            "learning" => Ok(Self::Learning),
            "interaction" => Ok(Self::Interaction),
            other => Err(format!("unknown memory kind: {}", other)),
        }
    }
}

/// Append-only log entry per employee; read with recency ordering and
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub employee_id: EmployeeId,
    pub kind: MemoryKind,
    pub content: String,
    /// Importance weight in `[0, 1]`; clamped on construction.
    pub importance: f64,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        employee_id: EmployeeId,
        kind: MemoryKind,
        content: impl Into<String>,
        importance: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            employee_id,
            kind,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

/// Status of a manager-to-CEO report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Submitted,
    Responded,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Responded => write!(f, "responded"),
        }
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "responded" => Ok(Self::Responded),
            other => Err(format!("unknown report status: {}", other)),
        }
    }
}

/// Periodic manager-to-CEO summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub manager_id: EmployeeId,
    pub ceo_id: EmployeeId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: ReportStatus,
    pub content: String,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(
        manager_id: EmployeeId,
        ceo_id: EmployeeId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            manager_id,
            ceo_id,
            period_start,
            period_end,
            status: ReportStatus::Submitted,
            content: content.into(),
            response: None,
            created_at: Utc::now(),
        }
    }
}

/// Event delivered through the mailbox substrate. Delivery is advisory:
/// every event has a proactive-scan fallback path, so losing one is never
/// fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrgEvent {
    /// A new top-level task entered the system (HR intake).
    TaskSubmitted { task_id: TaskId },
    /// A task was assigned to a worker.
    TaskAssigned { task_id: TaskId },
    /// A worker finished a task and produced a deliverable.
    DeliverableReady { task_id: TaskId, deliverable_id: Uuid },
    /// An evaluator sent a task back for rework.
    RevisionRequested { task_id: TaskId, feedback: String },
    /// A manager submitted a periodic report to the CEO.
    ReportSubmitted { report_id: Uuid },
}

impl OrgEvent {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task_submitted",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::DeliverableReady { .. } => "deliverable_ready",
            Self::RevisionRequested { .. } => "revision_requested",
            Self::ReportSubmitted { .. } => "report_submitted",
        }
    }
}
