//! Task lifecycle state machine.
//!
//! All status mutations go through [`apply`]; handlers never poke
//! `Task::status` directly. The machine is pure: it computes the next
//! status plus a side-effect descriptor, and the caller performs the
//! store writes and mailbox notifications. Invariants are enforced here
//! so every role loop shares one transition contract.
//!
//! ```text
//! pending -> in_progress -> completed -> reviewed
//!                 ^______________|___________|
//!                   (revision requested)
//! ```

use thiserror::Error;

use crate::model::{EmployeeId, Task, TaskStatus};

/// Events that drive task transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A worker was chosen for the task.
    Assign { employee: EmployeeId },
    /// The assigned worker finished and produced a deliverable.
    Complete,
    /// An evaluator scored the latest deliverable (1..=10).
    Evaluate { score: i64 },
    /// An evaluator or the API sent the task back for rework.
    RequestRevision { feedback: String },
}

/// What the caller must do after a successful transition, beyond writing
/// the new status.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Set `assigned_to` and notify the worker's mailbox.
    NotifyAssignee { employee: EmployeeId },
    /// Set `completed_at`.
    MarkCompleted,
    /// Score cleared the approval threshold; nothing further to do.
    Approved { score: i64 },
    /// Score below threshold; store feedback on the deliverable. The
    /// task stays `completed` and is eligible for a revision request.
    RecordFeedback { score: i64 },
    /// Clear `completed_at`, attach feedback to the latest deliverable,
    /// notify the worker.
    ReopenForRevision { feedback: String },
}

/// Outcome of applying a [`TaskEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: TaskStatus,
    pub effect: SideEffect,
}

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("cannot apply {event} to a task in status {status}")]
    InvalidTransition { status: TaskStatus, event: &'static str },
    #[error("evaluation score {0} outside 1..=10")]
    ScoreOutOfRange(i64),
    #[error("revision requested for a task with no assignee")]
    NoAssignee,
}

/// Scores at or above this value auto-approve a completed task.
pub const APPROVAL_THRESHOLD: i64 = 8;

/// Apply `event` to a task in `status`, using `approval_threshold` for
/// evaluation outcomes. Returns the transition or a typed error; the
/// caller decides whether an error is worth more than a log line.
pub fn apply(task: &Task, event: &TaskEvent, approval_threshold: i64) -> Result<Transition, LifecycleError> {
    match (task.status, event) {
        (TaskStatus::Pending, TaskEvent::Assign { employee }) => Ok(Transition {
            next: TaskStatus::InProgress,
            effect: SideEffect::NotifyAssignee { employee: *employee },
        }),
        (TaskStatus::InProgress, TaskEvent::Complete) => Ok(Transition {
            next: TaskStatus::Completed,
            effect: SideEffect::MarkCompleted,
        }),
        (TaskStatus::Completed, TaskEvent::Evaluate { score }) => {
            if !(1..=10).contains(score) {
                return Err(LifecycleError::ScoreOutOfRange(*score));
            }
            if *score >= approval_threshold {
                Ok(Transition {
                    next: TaskStatus::Reviewed,
                    effect: SideEffect::Approved { score: *score },
                })
            } else {
                Ok(Transition {
                    next: TaskStatus::Completed,
                    effect: SideEffect::RecordFeedback { score: *score },
                })
            }
        }
        (TaskStatus::Completed | TaskStatus::Reviewed, TaskEvent::RequestRevision { feedback }) => {
            if task.assigned_to.is_none() {
                return Err(LifecycleError::NoAssignee);
            }
            Ok(Transition {
                next: TaskStatus::InProgress,
                effect: SideEffect::ReopenForRevision {
                    feedback: feedback.clone(),
                },
            })
        }
        (status, event) => Err(LifecycleError::InvalidTransition {
            status,
            event: event_name(event),
        }),
    }
}

/// True when a top-level task must be decomposed before execution:
/// first pickup, no subtasks yet. Re-pickup after a restart sees the
/// existing subtasks and skips decomposition.
pub fn needs_decomposition(task: &Task, existing_subtasks: usize) -> bool {
    task.is_top_level() && existing_subtasks == 0
}

fn event_name(event: &TaskEvent) -> &'static str {
    match event {
        TaskEvent::Assign { .. } => "assign",
        TaskEvent::Complete => "complete",
        TaskEvent::Evaluate { .. } => "evaluate",
        TaskEvent::RequestRevision { .. } => "request_revision",
    }
}
