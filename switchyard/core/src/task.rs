//! Task Types
//!
//! A task is a unit of requested work with a type, a priority and a lifecycle
//! status. The orchestrator owns every task until it reaches a terminal status;
//! after that the record is read-only.
//!
//! # Lifecycle
//!
//! ```text
//! Pending -> Assigned -> InProgress -> Completed | Failed
//!    |  ^        |
//!    |  +--------+  (requeue: no eligible worker)
//!    +-----------+--> Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Task identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random task id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Task priority, ordered `Low < Medium < High < Critical`
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work
    Low,
    /// Normal work
    #[default]
    Medium,
    /// Dispatched ahead of normal work
    High,
    /// Dispatched ahead of everything else
    Critical,
}

impl Priority {
    /// Parse a priority name, case-insensitive
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Lowercase label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, waiting for a worker
    Pending,
    /// Claimed by a worker, not started yet
    Assigned,
    /// Worker is executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Worker returned an error or panicked
    Failed,
    /// Cancelled before dispatch
    Cancelled,
}

impl TaskStatus {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the task may still be cancelled
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned)
    }

    /// Whether `self -> next` is an allowed move
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, InProgress)
                | (Assigned, Pending)
                | (Assigned, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors from task state changes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The requested status change is not in the transition table
    #[error("task {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Task id
        id: TaskId,
        /// Status before the attempted move
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },
}

/// A unit of requested work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Capability key used to match workers
    pub task_type: String,

    /// Free-form description
    pub description: String,

    /// Scheduling priority
    pub priority: Priority,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Worker the task was dispatched to
    pub assigned_worker: Option<String>,

    /// Submission time
    pub created_at: DateTime<Utc>,

    /// Time execution started
    pub started_at: Option<DateTime<Utc>>,

    /// Time a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,

    /// Opaque input for the worker
    pub parameters: serde_json::Value,

    /// Opaque output from the worker
    pub result: Option<serde_json::Value>,

    /// Error text for failed tasks
    pub error: Option<String>,

    /// Times the task went back to the queue for lack of a worker
    pub requeue_count: u32,
}

impl Task {
    /// Create a pending task with a fresh id
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            assigned_worker: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            parameters,
            result: None,
            error: None,
            requeue_count: 0,
        }
    }

    /// Move to `next`, stamping timestamps on the way.
    ///
    /// Fails without touching the task when the move is not allowed.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::IllegalTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }

        match next {
            TaskStatus::InProgress => self.started_at = Some(Utc::now()),
            TaskStatus::Pending => {
                self.assigned_worker = None;
                self.requeue_count += 1;
            }
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Mark assigned to a worker
    pub fn assign(&mut self, worker: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Assigned)?;
        self.assigned_worker = Some(worker.into());
        Ok(())
    }

    /// Mark completed with a result
    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Mark failed with an error message
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record that the task stayed in the queue for another round.
    ///
    /// A pending task stays pending; an assigned task goes back to pending.
    pub fn requeue(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.requeue_count += 1;
                Ok(())
            }
            _ => self.transition(TaskStatus::Pending),
        }
    }
}
