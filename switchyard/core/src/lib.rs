//! Switchyard Core - Priority Task Dispatch with Provider Fallback
//!
//! This crate holds the dispatch engine: a priority queue of tasks, a pool of
//! agents matched by capability, and a fallback router that sends generation
//! requests across an ordered list of LLM providers. Agents and providers are
//! each guarded by a circuit breaker so a failing resource is skipped until it
//! has had time to recover.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                             │
//! │  submit ──► TaskQueue (priority, FIFO) ──► dispatch loops (N)     │
//! │                                              │                    │
//! │                         AgentRegistry.claim(task_type)            │
//! │                     (IDLE + capability + breaker allows)          │
//! │                                              │                    │
//! │                  spawn Agent::execute ──► EventBus (broadcast)    │
//! └──────────────────────────────────────────────┼────────────────────┘
//!                                                │
//! ┌──────────────────────────────────────────────┼────────────────────┐
//! │                        FallbackRouter        ▼                    │
//! │   strategy order ──► breaker filter ──► provider 1 ─ fail ─► 2 …  │
//! │                     (degraded: all open → try everything)         │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: queue, dispatch loops, task table, metrics
//! - [`AgentRegistry`] / [`ProviderRegistry`]: resources plus their breakers
//! - [`CircuitBreaker`]: CLOSED / OPEN / HALF_OPEN guard
//! - [`FallbackRouter`]: ordered provider fallback with timeouts
//! - [`Agent`] / [`GenerationProvider`]: the pluggable seams
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchyard_core::{
//!     AgentRegistry, BreakerConfig, DispatchConfig, FallbackRouter, GenerationAgent,
//!     OllamaProvider, Orchestrator, Priority, ProviderProfile, ProviderRegistry, RouterConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let providers = Arc::new(ProviderRegistry::new(BreakerConfig::default()));
//!     providers
//!         .register(Arc::new(OllamaProvider::from_env("llama3.2")), ProviderProfile::default())
//!         .unwrap();
//!     let router = Arc::new(FallbackRouter::new(providers, RouterConfig::default()));
//!
//!     let agents = Arc::new(AgentRegistry::new(BreakerConfig::default()));
//!     agents.register(Arc::new(GenerationAgent::new("gen-1", router))).unwrap();
//!
//!     let orchestrator = Arc::new(Orchestrator::new(agents, DispatchConfig::default()));
//!     orchestrator.start(4).unwrap();
//!
//!     let id = orchestrator.submit("generate", "Write a haiku", serde_json::Value::Null, Priority::High);
//!     let mut events = orchestrator.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if event.task_id == id { /* ... */ }
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`task`]: task records and the status state machine
//! - [`queue`]: priority queue with FIFO tie-break
//! - [`breaker`]: circuit breaker
//! - [`registry`]: agent and provider registries
//! - [`agents`]: the [`Agent`] trait and the generation agent
//! - [`providers`]: the [`GenerationProvider`] trait and the Ollama adapter
//! - [`router`]: fallback router and routing strategies
//! - [`orchestrator`]: dispatch loops, cancellation, starvation detection
//! - [`events`]: task lifecycle events
//! - [`metrics`]: counters and latency histograms
//! - [`config`]: TOML / environment / CLI configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agents;
pub mod breaker;
pub mod config;
pub mod events;
mod join;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod router;
pub mod task;

// Re-exports for convenience
pub use agents::{Agent, AgentError, GenerationAgent, TaskContext, DEFAULT_GENERATION_CAPABILITY};
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use events::{EventBus, TaskEvent, TaskEventKind, DEFAULT_EVENT_CAPACITY};
pub use metrics::{DispatchMetrics, Histogram, HistogramSnapshot, MetricsSnapshot};
pub use orchestrator::{
    DispatchConfig, DispatchOutcome, Orchestrator, OrchestratorError, SystemStatus, TaskSnapshot,
};
pub use providers::{
    GenerationProvider, OllamaProvider, ProviderError, ProviderOutput, ProviderRequest,
};
pub use queue::{QueuedTask, TaskQueue};
pub use registry::{
    AgentEntry, AgentRegistry, AgentSnapshot, ProviderEntry, ProviderProfile, ProviderRegistry,
    ProviderStats, ProviderStatsSnapshot, RegistryError, WorkerStatus,
};
pub use router::{
    FallbackRouter, GenerationRequest, GenerationResult, ProviderHealth, RouterConfig,
    RouterError, RouterStatsSnapshot, RoutingStrategy,
};
pub use task::{Priority, Task, TaskError, TaskId, TaskStatus};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, AgentSpec, ConfigError,
    ConfigOverrides, ConfigSource, ProviderKind, ProviderSpec, SwitchyardConfig, SwitchyardToml,
};
