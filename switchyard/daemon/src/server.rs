//! Daemon Server Implementation
//!
//! Hosts the orchestrator and fallback router for one process:
//! - Builds provider and agent registries from the resolved config
//! - Starts the dispatch loops
//! - Reads JSON-line requests from stdin
//! - Writes responses and lifecycle events as JSON lines to stdout
//! - Drains in-flight work and shuts down on EOF or signal
//!
//! # Line Protocol
//!
//! ```text
//! stdin  {"op":"submit","task_type":"generate","description":"…","priority":"high"}
//!        {"op":"cancel","task_id":"…"}
//!        {"op":"status","task_id":"…"}
//!        {"op":"system"} | {"op":"providers"}
//!
//! stdout {"type":"submitted","task_id":"…"}
//!        {"type":"event","task_id":"…","kind":"completed",…}
//!        {"type":"error","message":"…"}
//! ```
//!
//! A single writer task owns stdout so events and responses never interleave
//! within a line.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use switchyard_core::{
    AgentRegistry, FallbackRouter, GenerationAgent, OllamaProvider, Orchestrator, Priority,
    ProviderHealth, ProviderKind, ProviderProfile, ProviderRegistry, ProviderStatsSnapshot,
    RouterStatsSnapshot, SwitchyardConfig, SystemStatus, TaskEvent, TaskId, TaskSnapshot,
    DEFAULT_GENERATION_CAPABILITY,
};

/// Model used by the fallback provider when the config names none
const FALLBACK_MODEL: &str = "llama3.2";

/// Written when an output line cannot be serialized
const SERIALIZATION_FAILED: &str = "{\"type\":\"error\",\"message\":\"serialization failed\"}";

/// Output channel capacity (lines waiting for stdout)
const OUTPUT_CAPACITY: usize = 256;

// =============================================================================
// Protocol
// =============================================================================

/// One request line from stdin
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Queue a new task
    Submit {
        /// Capability key; defaults to `generate`
        #[serde(default)]
        task_type: Option<String>,
        /// Human-readable description
        #[serde(default)]
        description: String,
        /// Task parameters
        #[serde(default)]
        parameters: Value,
        /// Queue priority
        #[serde(default)]
        priority: Priority,
    },

    /// Cancel a pending task
    Cancel {
        /// Task to cancel
        task_id: TaskId,
    },

    /// Snapshot of one task
    Status {
        /// Task to inspect
        task_id: TaskId,
    },

    /// Snapshot of the dispatch side
    System,

    /// Provider health and stats
    Providers,
}

/// One output line on stdout
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    /// Task lifecycle event
    Event(TaskEvent),

    /// Task accepted
    Submitted {
        /// New task id
        task_id: TaskId,
    },

    /// Task cancelled
    Cancelled {
        /// Cancelled task id
        task_id: TaskId,
    },

    /// Task snapshot
    Status(TaskSnapshot),

    /// System snapshot
    System(SystemStatus),

    /// Provider health and counters
    Providers {
        /// Health per provider
        health: Vec<ProviderHealth>,
        /// Raw counters per provider
        stats: Vec<ProviderStatsSnapshot>,
        /// Router-level counters
        router: RouterStatsSnapshot,
    },

    /// Request could not be served
    Error {
        /// What went wrong
        message: String,
    },
}

impl Output {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize as one JSON line (without the newline)
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize output line");
            SERIALIZATION_FAILED.to_string()
        })
    }
}

// =============================================================================
// Server
// =============================================================================

/// The daemon: registries, router and orchestrator wired from config
pub struct DaemonServer {
    orchestrator: Arc<Orchestrator>,
    router: Arc<FallbackRouter>,
    dispatch_loops: usize,
    submitted: parking_lot::Mutex<Vec<TaskId>>,
}

impl DaemonServer {
    /// Build every component from a resolved configuration
    pub fn from_config(config: &SwitchyardConfig) -> Result<Self> {
        let providers = Arc::new(ProviderRegistry::new(config.provider_breaker.clone()));
        if config.providers.is_empty() {
            let provider = OllamaProvider::from_env(FALLBACK_MODEL);
            info!(base_url = %provider.base_url(), "No providers configured, using Ollama from environment");
            providers.register(Arc::new(provider), ProviderProfile::default())?;
        }
        for spec in &config.providers {
            let provider = match spec.kind {
                ProviderKind::Ollama => {
                    OllamaProvider::new(&spec.name, &spec.base_url, &spec.default_model)
                }
            };
            providers
                .register(Arc::new(provider), spec.profile.clone())
                .with_context(|| format!("Failed to register provider {}", spec.name))?;
            info!(provider = %spec.name, base_url = %spec.base_url, model = %spec.default_model, "Provider registered");
        }

        let router = Arc::new(FallbackRouter::new(providers, config.router.clone()));

        let agents = Arc::new(AgentRegistry::new(config.agent_breaker.clone()));
        if config.agents.is_empty() {
            agents.register(Arc::new(GenerationAgent::new("generator", Arc::clone(&router))))?;
            info!(agent = "generator", capability = DEFAULT_GENERATION_CAPABILITY, "No agents configured, using default generation agent");
        }
        for spec in &config.agents {
            let mut agent = GenerationAgent::new(&spec.id, Arc::clone(&router))
                .with_capabilities(spec.capabilities.iter().cloned());
            if let Some(ref system) = spec.system_prompt {
                agent = agent.with_system(system);
            }
            if let Some(strategy) = spec.strategy {
                agent = agent.with_strategy(strategy);
            }
            agents
                .register(Arc::new(agent))
                .with_context(|| format!("Failed to register agent {}", spec.id))?;
            info!(agent = %spec.id, capabilities = ?spec.capabilities, "Agent registered");
        }

        let orchestrator = Arc::new(Orchestrator::new(agents, config.dispatch.clone()));

        Ok(Self {
            orchestrator,
            router,
            dispatch_loops: config.dispatch_loops,
            submitted: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// The orchestrator
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Serve one parsed request
    pub fn handle_request(&self, request: Request) -> Output {
        match request {
            Request::Submit {
                task_type,
                description,
                parameters,
                priority,
            } => {
                let task_type =
                    task_type.unwrap_or_else(|| DEFAULT_GENERATION_CAPABILITY.to_string());
                let task_id = self
                    .orchestrator
                    .submit(task_type, description, parameters, priority);
                self.submitted.lock().push(task_id);
                Output::Submitted { task_id }
            }
            Request::Cancel { task_id } => match self.orchestrator.cancel(task_id) {
                Ok(()) => Output::Cancelled { task_id },
                Err(e) => Output::error(e.to_string()),
            },
            Request::Status { task_id } => match self.orchestrator.get_status(task_id) {
                Ok(snapshot) => Output::Status(snapshot),
                Err(e) => Output::error(e.to_string()),
            },
            Request::System => Output::System(self.orchestrator.get_system_status()),
            Request::Providers => Output::Providers {
                health: self.router.get_provider_health(),
                stats: self.router.get_provider_stats(),
                router: self.router.stats(),
            },
        }
    }

    /// Parse and serve one raw input line. Blank lines yield nothing.
    pub fn handle_line(&self, line: &str) -> Option<Output> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(request = ?request, "Request received");
                self.handle_request(request)
            }
            Err(e) => {
                warn!(error = %e, "Malformed request line");
                Output::error(format!("malformed request: {e}"))
            }
        })
    }

    /// True once every submitted task is terminal or flagged as starving
    fn is_drained(&self) -> bool {
        self.submitted.lock().iter().all(|id| {
            self.orchestrator
                .get_status(*id)
                .map(|s| s.task.status.is_terminal() || s.starving)
                .unwrap_or(true)
        })
    }

    /// Run until stdin closes and work drains, or until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (out_tx, out_rx) = mpsc::channel::<String>(OUTPUT_CAPACITY);
        let writer = tokio::spawn(write_lines(out_rx));
        let forwarder = tokio::spawn(forward_events(self.orchestrator.subscribe(), out_tx.clone()));
        let mut progress = self.orchestrator.subscribe();

        self.orchestrator.start(self.dispatch_loops)?;
        info!(loops = self.dispatch_loops, "Daemon ready, reading requests from stdin");

        tokio::pin!(shutdown);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut interrupted = false;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    interrupted = true;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(output) = self.handle_line(&line) {
                            if out_tx.send(output.to_line()).await.is_err() {
                                error!("Output writer stopped");
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                },
            }
        }

        if !interrupted {
            info!("Waiting for submitted tasks to finish");
            // Re-check after every lifecycle event; terminal and starving
            // transitions both emit one
            while !self.is_drained() {
                tokio::select! {
                    () = &mut shutdown => break,
                    event = progress.recv() => {
                        if let Err(broadcast::error::RecvError::Closed) = event {
                            break;
                        }
                    }
                }
            }
        }

        self.orchestrator.shutdown().await;
        forwarder.abort();
        drop(out_tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "Output writer ended abnormally");
        }
        Ok(())
    }
}

/// Forward lifecycle events to the output channel
async fn forward_events(mut events: broadcast::Receiver<TaskEvent>, out: mpsc::Sender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if out.send(Output::Event(event).to_line()).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event output lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Sole owner of stdout
async fn write_lines(mut lines: mpsc::Receiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!(error = %e, "Failed to write to stdout");
            break;
        }
        if let Err(e) = stdout.flush().await {
            error!(error = %e, "Failed to flush stdout");
            break;
        }
    }
}
