//! Task Lifecycle Events
//!
//! Structured events fanned out on a `tokio::sync::broadcast` channel. The
//! daemon forwards them as JSON lines; tests subscribe to assert on them.
//! Sending with no subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::task::{Priority, TaskId};

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a task
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Task was submitted
    Created {
        /// Capability key
        task_type: String,
        /// Queue priority
        priority: Priority,
    },

    /// Worker reported progress
    Progress {
        /// Completion estimate, 0-100
        percent: u8,
        /// Free-form status line
        message: String,
    },

    /// Worker finished successfully
    Completed {
        /// Worker that ran the task
        worker: String,
        /// Execution time in milliseconds
        duration_ms: u64,
    },

    /// Worker returned an error or panicked
    Failed {
        /// Worker that ran the task
        worker: String,
        /// Error text
        error: String,
    },

    /// Task was cancelled before dispatch
    Cancelled,

    /// Task has waited in the queue longer than the starvation threshold
    Starving {
        /// Time spent pending, in milliseconds
        waited_ms: u64,
        /// Times the task was requeued
        requeue_count: u32,
    },
}

/// A lifecycle event for one task
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskEvent {
    /// Task the event is about
    pub task_id: TaskId,

    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,

    /// Event payload
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

impl TaskEvent {
    /// Create an event stamped now
    pub fn new(task_id: TaskId, kind: TaskEventKind) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Short name of the event kind
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TaskEventKind::Created { .. } => "created",
            TaskEventKind::Progress { .. } => "progress",
            TaskEventKind::Completed { .. } => "completed",
            TaskEventKind::Failed { .. } => "failed",
            TaskEventKind::Cancelled => "cancelled",
            TaskEventKind::Starving { .. } => "starving",
        }
    }
}

/// Broadcast fan-out for task events
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publish an event
    pub fn emit(&self, task_id: TaskId, kind: TaskEventKind) {
        let event = TaskEvent::new(task_id, kind);
        tracing::trace!(task_id = %task_id, kind = event.kind_name(), "Task event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
