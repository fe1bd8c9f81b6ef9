//! Task records and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::host::SessionId;

/// Unique identifier for a task. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a task.
///
/// `pending -> starting -> running -> {completed | failed | cancelled}`;
/// the three right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, awaiting admission.
    Pending,
    /// Admitted; session creation and prompt delivery in progress.
    Starting,
    /// Prompt delivered; awaiting host-side idle detection.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled explicitly or via session deletion.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Task-level configuration carried on the record for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLimits {
    pub max_concurrent: usize,
}

/// One unit of delegated work, backed by a host session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at launch.
    pub id: TaskId,
    /// Human-readable description.
    pub description: String,
    /// Agent type this task executes as.
    pub agent: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Host session backing this task. Set once, never changed.
    pub session_id: Option<SessionId>,
    /// Result text; set only on successful completion.
    pub result: Option<String>,
    /// Error text; set only on failure or cancellation.
    pub error: Option<String>,
    /// Session that launched this task.
    pub parent_session_id: SessionId,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Original prompt text.
    pub prompt: String,
    /// Limits in effect when the task was launched.
    pub limits: TaskLimits,
}

impl Task {
    /// Creates a new task in `Pending` status.
    pub fn new(
        description: impl Into<String>,
        agent: impl Into<String>,
        prompt: impl Into<String>,
        parent_session_id: SessionId,
        limits: TaskLimits,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            description: description.into(),
            agent: agent.into(),
            status: TaskStatus::Pending,
            session_id: None,
            result: None,
            error: None,
            parent_session_id,
            created_at: Utc::now(),
            completed_at: None,
            prompt: prompt.into(),
            limits,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sets the status without a transition check.
    ///
    /// The status field is otherwise append-only behind the terminal guard
    /// in the manager. This escape hatch exists solely for the cancellation
    /// path, which must mark a queued task terminal before the governor can
    /// admit it. Do not use it anywhere else.
    pub(crate) fn force_status(&mut self, status: TaskStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> Task {
        Task::new(
            "Survey the codebase",
            "explorer",
            "List every module",
            SessionId::new("ses_parent"),
            TaskLimits { max_concurrent: 3 },
        )
    }

    #[test]
    fn new_task_is_pending_with_nothing_recorded() {
        let task = make_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.session_id.is_none());
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(make_task().id, make_task().id);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Starting.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            r#""cancelled""#
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            r#""pending""#
        );
    }
}
