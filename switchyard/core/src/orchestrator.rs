//! Orchestrator
//!
//! Owns submitted tasks and runs the dispatch loop: dequeue the head task,
//! match it to an idle, breaker-healthy agent, execute, record the outcome.
//!
//! # Dispatch Cycle
//!
//! ```text
//! queue.pop ──> still PENDING? ──no──> skip
//!                    │
//!                   yes
//!                    ▼
//!        claim first IDLE candidate whose breaker allows an attempt
//!                    │                          │
//!                 claimed                    none
//!                    ▼                          ▼
//!   ASSIGNED -> IN_PROGRESS -> execute     requeue (same priority),
//!                    │                     flag if starving, back off
//!         ok ────────┴──────── err/panic
//!   COMPLETED, breaker ok    FAILED, breaker fail, agent ERROR
//! ```
//!
//! # Ownership
//!
//! The orchestrator owns every task until it is terminal. Tasks live in a
//! `DashMap`; no map guard is held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::agents::TaskContext;
use crate::events::{EventBus, TaskEvent, TaskEventKind, DEFAULT_EVENT_CAPACITY};
use crate::join::join_error_message;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::queue::{QueuedTask, TaskQueue};
use crate::registry::{AgentEntry, AgentRegistry, AgentSnapshot, WorkerStatus};
use crate::task::{Priority, Task, TaskId, TaskStatus};

// ============================================================================
// Configuration
// ============================================================================

/// Dispatch loop settings
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchConfig {
    /// First backoff delay after a round with no eligible worker
    pub backoff_base: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
    /// ERROR agents are reset to IDLE after this long; `None` = manual reset
    pub agent_error_cooldown: Option<Duration>,
    /// Time in PENDING after which a requeued task is flagged as starving
    pub starvation_threshold: Duration,
    /// Events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            agent_error_cooldown: Some(Duration::from_secs(30)),
            starvation_threshold: Duration::from_secs(300),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ============================================================================
// Errors and Outcomes
// ============================================================================

/// Orchestrator errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No task with this id was submitted
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task has already started or finished
    #[error("task {id} cannot be cancelled in status {status}")]
    NotCancellable {
        /// Task id
        id: TaskId,
        /// Current status
        status: TaskStatus,
    },

    /// Dispatch loops are already running
    #[error("dispatch loops already running")]
    AlreadyRunning,
}

/// Result of one dispatch cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The queue was empty
    Empty,

    /// The dequeued task was no longer pending (e.g. cancelled)
    Skipped {
        /// Task id
        task_id: TaskId,
    },

    /// No eligible agent; the task went back to the queue
    Requeued {
        /// Task id
        task_id: TaskId,
    },

    /// The task ran to a terminal status
    Dispatched {
        /// Task id
        task_id: TaskId,
        /// Agent that ran it
        agent_id: String,
        /// `Completed` or `Failed`
        status: TaskStatus,
    },
}

/// Result of the synchronous half of a dispatch cycle
enum Claim {
    /// An agent was claimed and the task is IN_PROGRESS
    Ready {
        entry: Arc<AgentEntry>,
        task: Box<Task>,
    },
    /// Nothing to execute
    Done(DispatchOutcome),
}

// ============================================================================
// Snapshots
// ============================================================================

/// Serializable view of a task
#[derive(Clone, Debug, Serialize)]
pub struct TaskSnapshot {
    /// Task record
    #[serde(flatten)]
    pub task: Task,
    /// Whether the task has been flagged as starving
    pub starving: bool,
}

/// Serializable view of the whole system
#[derive(Clone, Debug, Serialize)]
pub struct SystemStatus {
    /// Dispatch counters
    pub metrics: MetricsSnapshot,
    /// Every registered agent
    pub agents: Vec<AgentSnapshot>,
    /// Items waiting in the queue
    pub queue_depth: usize,
    /// Pending tasks past the starvation threshold
    pub starving_tasks: Vec<TaskId>,
    /// Running dispatch loops
    pub dispatch_loops: usize,
}

// ============================================================================
// Backoff
// ============================================================================

#[derive(Debug)]
struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug)]
struct TaskRecord {
    task: Task,
    submitted: Instant,
}

/// Task scheduler and dispatch loop
pub struct Orchestrator {
    agents: Arc<AgentRegistry>,
    config: DispatchConfig,
    queue: TaskQueue,
    tasks: DashMap<TaskId, TaskRecord>,
    starving: DashSet<TaskId>,
    metrics: DispatchMetrics,
    events: EventBus,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator over an agent registry
    pub fn new(agents: Arc<AgentRegistry>, config: DispatchConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            agents,
            events: EventBus::new(config.event_capacity),
            config,
            queue: TaskQueue::new(),
            tasks: DashMap::new(),
            starving: DashSet::new(),
            metrics: DispatchMetrics::new(),
            shutdown,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// The agent registry
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Dispatch settings
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Subscribe to task lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Submission API
    // ------------------------------------------------------------------------

    /// Create a pending task and queue it by priority
    pub fn submit(
        &self,
        task_type: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        priority: Priority,
    ) -> TaskId {
        let task = Task::new(task_type, description, parameters, priority);
        let id = task.id;
        let task_type = task.task_type.clone();

        self.tasks.insert(
            id,
            TaskRecord {
                task,
                submitted: Instant::now(),
            },
        );
        self.queue.push(id, priority);

        tracing::info!(task_id = %id, task_type = %task_type, priority = %priority, "Task submitted");
        self.events
            .emit(id, TaskEventKind::Created { task_type, priority });
        id
    }

    /// Snapshot of one task
    pub fn get_status(&self, id: TaskId) -> Result<TaskSnapshot, OrchestratorError> {
        let record = self
            .tasks
            .get(&id)
            .ok_or(OrchestratorError::TaskNotFound(id))?;
        Ok(TaskSnapshot {
            task: record.task.clone(),
            starving: self.starving.contains(&id),
        })
    }

    /// Snapshot of the whole system
    pub fn get_system_status(&self) -> SystemStatus {
        SystemStatus {
            metrics: self.metrics.snapshot(),
            agents: self.agents.snapshots(),
            queue_depth: self.queue.len(),
            starving_tasks: self.starving.iter().map(|id| *id).collect(),
            dispatch_loops: self.loops.lock().len(),
        }
    }

    /// Cancel a task that has not started yet
    pub fn cancel(&self, id: TaskId) -> Result<(), OrchestratorError> {
        {
            let mut record = self
                .tasks
                .get_mut(&id)
                .ok_or(OrchestratorError::TaskNotFound(id))?;
            let status = record.task.status;
            if !status.is_cancellable() {
                return Err(OrchestratorError::NotCancellable { id, status });
            }
            record
                .task
                .transition(TaskStatus::Cancelled)
                .map_err(|_| OrchestratorError::NotCancellable { id, status })?;
        }

        self.starving.remove(&id);
        self.metrics.record_cancel();
        tracing::info!(task_id = %id, "Task cancelled");
        self.events.emit(id, TaskEventKind::Cancelled);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn `loops` concurrent dispatch loops
    pub fn start(self: &Arc<Self>, loops: usize) -> Result<(), OrchestratorError> {
        let mut handles = self.loops.lock();
        if !handles.is_empty() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        self.shutdown.send_replace(false);
        for loop_id in 0..loops.max(1) {
            let this = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(this.run_loop(loop_id, shutdown)));
        }

        tracing::info!(loops = handles.len(), "Dispatch loops started");
        Ok(())
    }

    /// Stop all dispatch loops and wait for in-flight executions to finish
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<_> = std::mem::take(&mut *self.loops.lock());

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatch loop ended abnormally");
            }
        }
        tracing::info!("Orchestrator shut down");
    }

    /// Run exactly one dispatch cycle without waiting for work.
    ///
    /// A task with no eligible agent is requeued immediately.
    pub async fn dispatch_once(&self) -> DispatchOutcome {
        let Some(item) = self.queue.try_pop() else {
            return DispatchOutcome::Empty;
        };

        let outcome = self.dispatch_item(item).await;
        if matches!(outcome, DispatchOutcome::Requeued { .. }) {
            self.queue.push(item.task_id, item.priority);
        }
        outcome
    }

    async fn run_loop(self: Arc<Self>, loop_id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(loop_id, "Dispatch loop running");
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        // Tasks passed over while scanning for routable work. Only held between
        // synchronous claim attempts; they are back in the queue before this
        // loop awaits anything.
        let mut deferred: Vec<QueuedTask> = Vec::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let item = if deferred.is_empty() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    item = self.queue.pop() => item,
                }
            } else if let Some(item) = self.queue.try_pop() {
                item
            } else {
                self.restore(&mut deferred);
                let delay = backoff.next_delay();
                tracing::debug!(loop_id, delay_ms = delay.as_millis() as u64, "No eligible agents, backing off");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            };

            match self.claim_item(item) {
                Claim::Ready { entry, task } => {
                    self.restore(&mut deferred);
                    backoff.reset();
                    self.execute(entry, *task).await;
                }
                Claim::Done(DispatchOutcome::Requeued { .. }) => deferred.push(item),
                Claim::Done(_) => {}
            }
        }

        self.restore(&mut deferred);
        tracing::debug!(loop_id, "Dispatch loop stopped");
    }

    fn restore(&self, deferred: &mut Vec<QueuedTask>) {
        for item in deferred.drain(..) {
            self.queue.push(item.task_id, item.priority);
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// One cycle for a dequeued item. `Requeued` means the caller must push
    /// the item back.
    async fn dispatch_item(&self, item: QueuedTask) -> DispatchOutcome {
        match self.claim_item(item) {
            Claim::Ready { entry, task } => self.execute(entry, *task).await,
            Claim::Done(outcome) => outcome,
        }
    }

    /// Match a dequeued item to an agent and move it to IN_PROGRESS.
    /// Never awaits.
    fn claim_item(&self, item: QueuedTask) -> Claim {
        let task_id = item.task_id;

        let task_type = match self.tasks.get(&task_id) {
            Some(record) if record.task.status == TaskStatus::Pending => record.task.task_type.clone(),
            _ => {
                tracing::debug!(task_id = %task_id, "Skipping task that is no longer pending");
                return Claim::Done(DispatchOutcome::Skipped { task_id });
            }
        };

        let Some(entry) = self.agents.claim(&task_type, self.config.agent_error_cooldown) else {
            return Claim::Done(self.requeue(task_id));
        };
        let agent_id = entry.id().to_string();

        // Assign under the task's map guard so a concurrent cancel cannot interleave
        let task = {
            let Some(mut record) = self.tasks.get_mut(&task_id) else {
                entry.set_status(WorkerStatus::Idle);
                return Claim::Done(DispatchOutcome::Skipped { task_id });
            };
            if record.task.status != TaskStatus::Pending {
                entry.set_status(WorkerStatus::Idle);
                return Claim::Done(DispatchOutcome::Skipped { task_id });
            }
            let started = record
                .task
                .assign(agent_id.clone())
                .and_then(|()| record.task.transition(TaskStatus::InProgress));
            if let Err(e) = started {
                tracing::error!(task_id = %task_id, error = %e, "Could not start task");
                entry.set_status(WorkerStatus::Idle);
                return Claim::Done(DispatchOutcome::Skipped { task_id });
            }
            record.task.clone()
        };
        self.starving.remove(&task_id);

        tracing::info!(task_id = %task_id, agent = %agent_id, task_type = %task_type, "Task dispatched");
        Claim::Ready {
            entry,
            task: Box::new(task),
        }
    }

    /// Run a claimed task on its own spawned task and record the outcome
    async fn execute(&self, entry: Arc<AgentEntry>, task: Task) -> DispatchOutcome {
        let task_id = task.id;
        let agent_id = entry.id().to_string();

        let ctx = TaskContext::new(task_id, agent_id.clone(), self.events.clone());
        let agent = Arc::clone(entry.agent());
        let started = Instant::now();
        let result = match tokio::spawn(async move { agent.execute(&task, &ctx).await }).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_error) => Err(format!("agent {}", join_error_message(join_error))),
        };
        let duration = started.elapsed();
        let success = result.is_ok();

        entry.finish(success);
        self.metrics.record_execution(duration, success);

        let status = {
            let mut record = self.tasks.get_mut(&task_id);
            let recorded = match (record.as_deref_mut(), &result) {
                (Some(r), Ok(value)) => r.task.complete(value.clone()),
                (Some(r), Err(error)) => r.task.fail(error.clone()),
                (None, _) => Ok(()),
            };
            if let Err(e) = recorded {
                tracing::error!(task_id = %task_id, error = %e, "Could not record task outcome");
            }
            if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            }
        };

        let duration_ms = duration.as_millis() as u64;
        match result {
            Ok(_) => {
                tracing::info!(task_id = %task_id, agent = %agent_id, duration_ms, "Task completed");
                self.events.emit(
                    task_id,
                    TaskEventKind::Completed {
                        worker: agent_id.clone(),
                        duration_ms,
                    },
                );
            }
            Err(error) => {
                tracing::warn!(task_id = %task_id, agent = %agent_id, error = %error, "Task failed");
                self.events.emit(
                    task_id,
                    TaskEventKind::Failed {
                        worker: agent_id.clone(),
                        error,
                    },
                );
            }
        }

        DispatchOutcome::Dispatched {
            task_id,
            agent_id,
            status,
        }
    }

    /// Book-keeping for a task that found no eligible agent
    fn requeue(&self, task_id: TaskId) -> DispatchOutcome {
        let (waited, requeue_count) = {
            let Some(mut record) = self.tasks.get_mut(&task_id) else {
                return DispatchOutcome::Skipped { task_id };
            };
            if record.task.status != TaskStatus::Pending {
                return DispatchOutcome::Skipped { task_id };
            }
            if let Err(e) = record.task.requeue() {
                tracing::error!(task_id = %task_id, error = %e, "Could not requeue task");
                return DispatchOutcome::Skipped { task_id };
            }
            (record.submitted.elapsed(), record.task.requeue_count)
        };
        self.metrics.record_requeue();
        tracing::debug!(task_id = %task_id, requeue_count, "No eligible agent, task requeued");

        if waited >= self.config.starvation_threshold && self.starving.insert(task_id) {
            let waited_ms = waited.as_millis() as u64;
            tracing::warn!(
                task_id = %task_id,
                waited_ms,
                requeue_count,
                "Task is starving: no eligible agent"
            );
            self.events.emit(
                task_id,
                TaskEventKind::Starving {
                    waited_ms,
                    requeue_count,
                },
            );
        }

        DispatchOutcome::Requeued { task_id }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tasks", &self.tasks.len())
            .field("queue_depth", &self.queue.len())
            .field("agents", &self.agents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentError};
    use crate::breaker::{BreakerConfig, CircuitState};
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedAgent {
        id: String,
        capabilities: Vec<String>,
        fail: bool,
    }

    impl ScriptedAgent {
        fn ok(id: &str, capability: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                capabilities: vec![capability.into()],
                fail: false,
            })
        }

        fn failing(id: &str, capability: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                capabilities: vec![capability.into()],
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> &[String] {
            &self.capabilities
        }

        async fn execute(
            &self,
            task: &Task,
            _ctx: &TaskContext,
        ) -> Result<serde_json::Value, AgentError> {
            if self.fail {
                Err(AgentError::Failed(format!("{} refused", self.id)))
            } else {
                Ok(json!({ "echo": task.description }))
            }
        }
    }

    fn orchestrator(agent_breaker: BreakerConfig) -> Orchestrator {
        Orchestrator::new(
            Arc::new(AgentRegistry::new(agent_breaker)),
            DispatchConfig::default(),
        )
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2));
        let delays: Vec<u128> = (0..7).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600, 2000, 2000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_dispatch_once_empty() {
        let orch = orchestrator(BreakerConfig::default());
        assert_eq!(orch.dispatch_once().await, DispatchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let orch = orchestrator(BreakerConfig::default());
        orch.agents().register(ScriptedAgent::ok("a", "echo")).unwrap();

        let id = orch.submit("echo", "hello", json!({}), Priority::Medium);
        let outcome = orch.dispatch_once().await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                task_id: id,
                agent_id: "a".into(),
                status: TaskStatus::Completed,
            }
        );

        let snapshot = orch.get_status(id).unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Completed);
        assert_eq!(snapshot.task.result, Some(json!({"echo": "hello"})));
        assert_eq!(snapshot.task.assigned_worker.as_deref(), Some("a"));
        assert!(snapshot.task.started_at.is_some());
        assert_eq!(orch.agents().get("a").unwrap().status(), WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_failed_dispatch_marks_agent_error() {
        let orch = orchestrator(BreakerConfig::default());
        orch.agents().register(ScriptedAgent::failing("a", "echo")).unwrap();

        let id = orch.submit("echo", "hello", json!({}), Priority::Medium);
        orch.dispatch_once().await;

        let snapshot = orch.get_status(id).unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Failed);
        assert_eq!(snapshot.task.error.as_deref(), Some("a refused"));

        let agent = orch.agents().get("a").unwrap();
        assert_eq!(agent.status(), WorkerStatus::Error);
        assert_eq!(agent.breaker().snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_unroutable_task_is_requeued() {
        let orch = orchestrator(BreakerConfig::default());
        let id = orch.submit("nobody-serves-this", "x", json!({}), Priority::High);

        assert_eq!(
            orch.dispatch_once().await,
            DispatchOutcome::Requeued { task_id: id }
        );
        let snapshot = orch.get_status(id).unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Pending);
        assert_eq!(snapshot.task.requeue_count, 1);
        assert_eq!(orch.get_system_status().queue_depth, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_agent_is_skipped() {
        let orch = orchestrator(BreakerConfig::default());
        let a = orch.agents().register(ScriptedAgent::ok("a", "echo")).unwrap();
        a.breaker().force_state(CircuitState::Open);

        let id = orch.submit("echo", "x", json!({}), Priority::Low);
        assert_eq!(
            orch.dispatch_once().await,
            DispatchOutcome::Requeued { task_id: id }
        );
    }

    #[tokio::test]
    async fn test_cancel() {
        let orch = orchestrator(BreakerConfig::default());
        orch.agents().register(ScriptedAgent::ok("a", "echo")).unwrap();

        let id = orch.submit("echo", "x", json!({}), Priority::Low);
        orch.cancel(id).unwrap();
        assert_eq!(orch.get_status(id).unwrap().task.status, TaskStatus::Cancelled);

        // Dequeued but discarded
        assert_eq!(orch.dispatch_once().await, DispatchOutcome::Skipped { task_id: id });
        assert_eq!(
            orch.cancel(id),
            Err(OrchestratorError::NotCancellable {
                id,
                status: TaskStatus::Cancelled
            })
        );

        let missing = TaskId::generate();
        assert_eq!(orch.cancel(missing), Err(OrchestratorError::TaskNotFound(missing)));
        assert_eq!(orch.get_system_status().metrics.tasks_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starvation_flagged_once() {
        let orch = Orchestrator::new(
            Arc::new(AgentRegistry::default()),
            DispatchConfig {
                starvation_threshold: Duration::from_secs(10),
                ..DispatchConfig::default()
            },
        );
        let mut events = orch.subscribe();
        let id = orch.submit("orphan", "x", json!({}), Priority::Medium);

        orch.dispatch_once().await;
        assert!(orch.get_system_status().starving_tasks.is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        orch.dispatch_once().await;
        orch.dispatch_once().await;

        assert_eq!(orch.get_system_status().starving_tasks, vec![id]);
        assert!(orch.get_status(id).unwrap().starving);

        let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.kind_name())
            .collect();
        assert_eq!(kinds, vec!["created", "starving"]);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let orch = Arc::new(orchestrator(BreakerConfig::default()));
        orch.start(2).unwrap();
        assert_eq!(orch.start(1), Err(OrchestratorError::AlreadyRunning));
        assert_eq!(orch.get_system_status().dispatch_loops, 2);

        orch.shutdown().await;
        assert_eq!(orch.get_system_status().dispatch_loops, 0);
        orch.start(1).unwrap();
        orch.shutdown().await;
    }
}
