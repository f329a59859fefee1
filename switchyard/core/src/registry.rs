//! Agent and Provider Registries
//!
//! Registries track workers and generation backends together with the
//! circuit breaker attached to each. Both keep registration order, which is
//! the tie-breaker for worker selection and for provider ordering.
//!
//! # Locking
//!
//! The index itself sits behind a `parking_lot::RwLock` that is only held to
//! clone out `Arc` entries. Each entry then has its own mutex for mutable
//! state (worker status, provider stats), and its breaker has another.
//! No lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::agents::Agent;
use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::providers::GenerationProvider;

/// Cost per 1k tokens used when a provider has no configured rate
pub const DEFAULT_COST_PER_1K_TOKENS: f64 = 0.01;

/// Registration failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// An agent with this id is already registered
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    /// A provider with this name is already registered
    #[error("provider already registered: {0}")]
    DuplicateProvider(String),
}

// ============================================================================
// Worker Status
// ============================================================================

/// Worker availability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Ready for a task
    Idle,
    /// Executing a task
    Busy,
    /// Last execution failed
    Error,
    /// Taken out of rotation
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Error => "ERROR",
            Self::Offline => "OFFLINE",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Agent Entry
// ============================================================================

#[derive(Debug)]
struct WorkerState {
    status: WorkerStatus,
    since: Instant,
    last_status_change: DateTime<Utc>,
    tasks_completed: u64,
    tasks_failed: u64,
}

impl WorkerState {
    fn set(&mut self, status: WorkerStatus) {
        self.status = status;
        self.since = Instant::now();
        self.last_status_change = Utc::now();
    }
}

/// A registered agent with its breaker and status
pub struct AgentEntry {
    agent: Arc<dyn Agent>,
    breaker: CircuitBreaker,
    state: Mutex<WorkerState>,
}

impl AgentEntry {
    fn new(agent: Arc<dyn Agent>, config: BreakerConfig) -> Self {
        let breaker = CircuitBreaker::with_config(agent.id(), config);
        Self {
            agent,
            breaker,
            state: Mutex::new(WorkerState {
                status: WorkerStatus::Idle,
                since: Instant::now(),
                last_status_change: Utc::now(),
                tasks_completed: 0,
                tasks_failed: 0,
            }),
        }
    }

    /// Agent id
    pub fn id(&self) -> &str {
        self.agent.id()
    }

    /// The agent implementation
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Breaker guarding this agent
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Current status
    pub fn status(&self) -> WorkerStatus {
        self.state.lock().status
    }

    /// Set the status unconditionally
    pub fn set_status(&self, status: WorkerStatus) {
        self.state.lock().set(status);
    }

    /// Flip IDLE to BUSY. Returns `false` if the worker was not idle.
    pub fn try_claim(&self) -> bool {
        let mut state = self.state.lock();
        if state.status == WorkerStatus::Idle {
            state.set(WorkerStatus::Busy);
            true
        } else {
            false
        }
    }

    /// Record the outcome of an execution and release the worker
    pub(crate) fn finish(&self, success: bool) {
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }

        let mut state = self.state.lock();
        if success {
            state.tasks_completed += 1;
            state.set(WorkerStatus::Idle);
        } else {
            state.tasks_failed += 1;
            state.set(WorkerStatus::Error);
        }
    }

    /// Reset an ERROR worker to IDLE once it has been in ERROR for `cooldown`
    pub(crate) fn recover_if_cooled(&self, cooldown: Duration) -> bool {
        let mut state = self.state.lock();
        if state.status == WorkerStatus::Error && state.since.elapsed() >= cooldown {
            state.set(WorkerStatus::Idle);
            tracing::info!(agent = %self.agent.id(), "Agent recovered from error after cooldown");
            true
        } else {
            false
        }
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> AgentSnapshot {
        let breaker = self.breaker.snapshot();
        let state = self.state.lock();
        AgentSnapshot {
            id: self.agent.id().to_string(),
            capabilities: self.agent.capabilities().to_vec(),
            status: state.status,
            last_status_change: state.last_status_change,
            tasks_completed: state.tasks_completed,
            tasks_failed: state.tasks_failed,
            breaker,
        }
    }
}

impl std::fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEntry")
            .field("id", &self.agent.id())
            .field("status", &self.status())
            .field("breaker", &self.breaker)
            .finish()
    }
}

/// Serializable view of an agent
#[derive(Clone, Debug, Serialize)]
pub struct AgentSnapshot {
    /// Agent id
    pub id: String,
    /// Task types served
    pub capabilities: Vec<String>,
    /// Current status
    pub status: WorkerStatus,
    /// Wall-clock time of the last status change
    pub last_status_change: DateTime<Utc>,
    /// Successful executions
    pub tasks_completed: u64,
    /// Failed executions
    pub tasks_failed: u64,
    /// Breaker state
    pub breaker: BreakerSnapshot,
}

// ============================================================================
// Agent Registry
// ============================================================================

#[derive(Default)]
struct AgentIndex {
    entries: Vec<Arc<AgentEntry>>,
    by_id: HashMap<String, usize>,
    by_capability: HashMap<String, Vec<usize>>,
}

/// Registry of workers and their capability index
pub struct AgentRegistry {
    breaker_config: BreakerConfig,
    index: RwLock<AgentIndex>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl AgentRegistry {
    /// Create an empty registry; each agent gets a breaker with `breaker_config`
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            breaker_config,
            index: RwLock::new(AgentIndex::default()),
        }
    }

    /// Register an agent and index its capabilities
    pub fn register(&self, agent: Arc<dyn Agent>) -> Result<Arc<AgentEntry>, RegistryError> {
        let mut index = self.index.write();
        let id = agent.id().to_string();
        if index.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateAgent(id));
        }

        let position = index.entries.len();
        let entry = Arc::new(AgentEntry::new(agent, self.breaker_config.clone()));
        for capability in entry.agent.capabilities() {
            let slots = index.by_capability.entry(capability.clone()).or_default();
            if !slots.contains(&position) {
                slots.push(position);
            }
        }
        index.by_id.insert(id.clone(), position);
        index.entries.push(entry.clone());

        tracing::info!(
            agent = %id,
            capabilities = ?entry.agent.capabilities(),
            "Registered agent"
        );
        Ok(entry)
    }

    /// Agents serving `task_type`, in registration order
    pub fn candidates(&self, task_type: &str) -> Vec<Arc<AgentEntry>> {
        let index = self.index.read();
        index
            .by_capability
            .get(task_type)
            .map(|slots| slots.iter().map(|&i| index.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Claim the first candidate for `task_type` that is idle and whose
    /// breaker allows an attempt.
    ///
    /// With a cooldown, ERROR workers that have waited long enough are
    /// reset to IDLE first.
    pub fn claim(&self, task_type: &str, error_cooldown: Option<Duration>) -> Option<Arc<AgentEntry>> {
        self.candidates(task_type).into_iter().find(|entry| {
            if let Some(cooldown) = error_cooldown {
                entry.recover_if_cooled(cooldown);
            }
            entry.status() == WorkerStatus::Idle
                && entry.breaker.can_attempt()
                && entry.try_claim()
        })
    }

    /// Look up an agent by id
    pub fn get(&self, id: &str) -> Option<Arc<AgentEntry>> {
        let index = self.index.read();
        index.by_id.get(id).map(|&i| index.entries[i].clone())
    }

    /// Set an agent's status. Returns `false` for unknown ids.
    pub fn set_status(&self, id: &str, status: WorkerStatus) -> bool {
        match self.get(id) {
            Some(entry) => {
                entry.set_status(status);
                tracing::info!(agent = %id, status = %status, "Agent status set");
                true
            }
            None => false,
        }
    }

    /// All agents, in registration order
    pub fn list(&self) -> Vec<Arc<AgentEntry>> {
        self.index.read().entries.clone()
    }

    /// Snapshots of all agents
    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        self.list().iter().map(|e| e.snapshot()).collect()
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    /// Whether no agents are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Provider Entry
// ============================================================================

/// Ranking metadata used by routing strategies
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Relative output quality (higher is better)
    pub quality: f64,
    /// Relative response speed (higher is faster)
    pub speed: f64,
    /// Cost per 1k tokens in dollars, if known
    pub cost_per_1k_tokens: Option<f64>,
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            quality: 5.0,
            speed: 5.0,
            cost_per_1k_tokens: None,
        }
    }
}

impl ProviderProfile {
    /// Rate used for cost accounting and `cost_optimized` ordering
    #[must_use]
    pub fn effective_cost_per_1k(&self) -> f64 {
        self.cost_per_1k_tokens.unwrap_or(DEFAULT_COST_PER_1K_TOKENS)
    }

    /// Dollar cost of `tokens`
    #[must_use]
    pub fn cost_of(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.effective_cost_per_1k()
    }
}

/// Rolling call statistics for one provider
#[derive(Clone, Debug, Default)]
pub struct ProviderStats {
    /// Calls attempted
    pub total_calls: u64,
    /// Calls that succeeded
    pub successful_calls: u64,
    /// Calls that failed or timed out
    pub failed_calls: u64,
    /// Tokens consumed by successful calls
    pub total_tokens: u64,
    /// Accumulated cost in dollars
    pub total_cost: f64,
    /// Accumulated latency over all calls
    pub total_latency: Duration,
    /// Time of the last call
    pub last_used: Option<DateTime<Utc>>,
    /// Message of the last failure
    pub last_error: Option<String>,
}

impl ProviderStats {
    /// Fraction of calls that succeeded, 0.0 with no calls
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

/// A registered provider with its breaker and stats
pub struct ProviderEntry {
    provider: Arc<dyn GenerationProvider>,
    profile: ProviderProfile,
    breaker: CircuitBreaker,
    stats: Mutex<ProviderStats>,
}

impl ProviderEntry {
    /// Provider name
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// The provider implementation
    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Ranking metadata
    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Breaker guarding this provider
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Copy of the current stats
    pub fn stats(&self) -> ProviderStats {
        self.stats.lock().clone()
    }

    /// Record a successful call, returning its cost
    pub(crate) fn record_success(&self, tokens: u64, latency: Duration) -> f64 {
        self.breaker.record_success();
        let cost = self.profile.cost_of(tokens);
        let mut stats = self.stats.lock();
        stats.total_calls += 1;
        stats.successful_calls += 1;
        stats.total_tokens += tokens;
        stats.total_cost += cost;
        stats.total_latency += latency;
        stats.last_used = Some(Utc::now());
        cost
    }

    /// Record a failed call
    pub(crate) fn record_failure(&self, error: &str, latency: Duration) {
        self.breaker.record_failure();
        let mut stats = self.stats.lock();
        stats.total_calls += 1;
        stats.failed_calls += 1;
        stats.total_latency += latency;
        stats.last_used = Some(Utc::now());
        stats.last_error = Some(error.to_string());
    }

    /// Serializable stats plus breaker state
    pub fn snapshot(&self) -> ProviderStatsSnapshot {
        let state = self.breaker.state();
        let stats = self.stats.lock();
        let avg_latency_ms = if stats.total_calls == 0 {
            0.0
        } else {
            stats.total_latency.as_secs_f64() * 1000.0 / stats.total_calls as f64
        };
        ProviderStatsSnapshot {
            name: self.provider.name().to_string(),
            default_model: self.provider.default_model().to_string(),
            profile: self.profile.clone(),
            breaker_state: state,
            total_calls: stats.total_calls,
            successful_calls: stats.successful_calls,
            failed_calls: stats.failed_calls,
            success_rate: stats.success_rate(),
            total_tokens: stats.total_tokens,
            total_cost: stats.total_cost,
            avg_latency_ms,
            last_used: stats.last_used,
            last_error: stats.last_error.clone(),
        }
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.provider.name())
            .field("profile", &self.profile)
            .field("breaker", &self.breaker)
            .finish()
    }
}

/// Serializable provider stats for monitoring
#[derive(Clone, Debug, Serialize)]
pub struct ProviderStatsSnapshot {
    /// Provider name
    pub name: String,
    /// Default model
    pub default_model: String,
    /// Ranking metadata
    pub profile: ProviderProfile,
    /// Current breaker state
    pub breaker_state: CircuitState,
    /// Calls attempted
    pub total_calls: u64,
    /// Calls that succeeded
    pub successful_calls: u64,
    /// Calls that failed
    pub failed_calls: u64,
    /// successful / total
    pub success_rate: f64,
    /// Tokens consumed
    pub total_tokens: u64,
    /// Accumulated cost in dollars
    pub total_cost: f64,
    /// Mean latency over all calls
    pub avg_latency_ms: f64,
    /// Time of the last call
    pub last_used: Option<DateTime<Utc>>,
    /// Last failure message
    pub last_error: Option<String>,
}

// ============================================================================
// Provider Registry
// ============================================================================

#[derive(Default)]
struct ProviderIndex {
    entries: Vec<Arc<ProviderEntry>>,
    by_name: HashMap<String, usize>,
}

/// Registry of generation providers
pub struct ProviderRegistry {
    breaker_config: BreakerConfig,
    index: RwLock<ProviderIndex>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl ProviderRegistry {
    /// Create an empty registry; each provider gets a breaker with `breaker_config`
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            breaker_config,
            index: RwLock::new(ProviderIndex::default()),
        }
    }

    /// Register a provider with its ranking profile
    pub fn register(
        &self,
        provider: Arc<dyn GenerationProvider>,
        profile: ProviderProfile,
    ) -> Result<Arc<ProviderEntry>, RegistryError> {
        let mut index = self.index.write();
        let name = provider.name().to_string();
        if index.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateProvider(name));
        }

        let entry = Arc::new(ProviderEntry {
            breaker: CircuitBreaker::with_config(name.clone(), self.breaker_config.clone()),
            provider,
            profile,
            stats: Mutex::new(ProviderStats::default()),
        });
        let slot = index.entries.len();
        index.by_name.insert(name.clone(), slot);
        index.entries.push(entry.clone());

        tracing::info!(
            provider = %name,
            model = %entry.provider.default_model(),
            quality = entry.profile.quality,
            speed = entry.profile.speed,
            "Registered provider"
        );
        Ok(entry)
    }

    /// Look up a provider by name
    pub fn get(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        let index = self.index.read();
        index.by_name.get(name).map(|&i| index.entries[i].clone())
    }

    /// All providers, in registration order
    pub fn list(&self) -> Vec<Arc<ProviderEntry>> {
        self.index.read().entries.clone()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    /// Whether no providers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
