//! Agent Traits
//!
//! The worker execute contract. An agent declares the task types it serves
//! and runs one task at a time; the orchestrator handles matching, breaker
//! bookkeeping and status updates.

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{EventBus, TaskEventKind};
use crate::router::RouterError;
use crate::task::{Task, TaskId};

/// Agent execution failure
#[derive(Debug, Error)]
pub enum AgentError {
    /// Generic failure with a message
    #[error("{0}")]
    Failed(String),

    /// Task parameters were missing or malformed
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Generation through the fallback router failed
    #[error(transparent)]
    Generation(#[from] RouterError),
}

/// Per-execution handle given to an agent
#[derive(Clone, Debug)]
pub struct TaskContext {
    task_id: TaskId,
    agent_id: String,
    events: EventBus,
}

impl TaskContext {
    /// Create a context for one execution
    pub fn new(task_id: TaskId, agent_id: impl Into<String>, events: EventBus) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            events,
        }
    }

    /// Task being executed
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Agent running the task
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Emit a `progress` event; `percent` is clamped to 100
    pub fn report_progress(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(
            task_id = %self.task_id,
            agent = %self.agent_id,
            percent,
            message = %message,
            "Task progress"
        );
        self.events.emit(
            self.task_id,
            TaskEventKind::Progress {
                percent: percent.min(100),
                message,
            },
        );
    }
}

/// Capability-bound task executor
///
/// Implement this trait to add a worker to the agent registry.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent id
    fn id(&self) -> &str;

    /// Task types this agent serves
    fn capabilities(&self) -> &[String];

    /// Execute a task, returning its result payload
    async fn execute(
        &self,
        task: &Task,
        ctx: &TaskContext,
    ) -> Result<serde_json::Value, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_progress_emits_event() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let id = TaskId::generate();
        let ctx = TaskContext::new(id, "agent-1", bus);

        ctx.report_progress(250, "almost");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, id);
        assert_eq!(
            event.kind,
            TaskEventKind::Progress {
                percent: 100,
                message: "almost".into()
            }
        );
        assert_eq!(ctx.agent_id(), "agent-1");
    }

    #[test]
    fn test_router_error_converts() {
        let err: AgentError = RouterError::NoProviders.into();
        assert!(matches!(err, AgentError::Generation(RouterError::NoProviders)));
        assert_eq!(err.to_string(), RouterError::NoProviders.to_string());
    }
}
