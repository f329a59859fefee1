//! Fallback Router
//!
//! Runs a generation request against an ordered list of providers and
//! returns the first success.
//!
//! # Algorithm
//!
//! 1. Keep providers whose breaker allows an attempt. If none does, fall back
//!    to the full list (degraded mode: availability over isolation).
//! 2. Order candidates by strategy, then move the preferred provider (if any)
//!    to the front. Sorts are stable so ties keep registration order.
//! 3. Try each candidate under a timeout. Panics and timeouts count as
//!    failures; the first success wins.
//!
//! Every outcome feeds the provider's breaker and stats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::breaker::CircuitState;
use crate::join::{join_error_message, AbortOnDrop};
use crate::metrics::{Histogram, HistogramSnapshot};
use crate::providers::{ProviderError, ProviderOutput, ProviderRequest, DEFAULT_PROVIDER_TIMEOUT};
use crate::registry::{ProviderEntry, ProviderRegistry, ProviderStatsSnapshot};

/// Success rate above which a closed provider counts as healthy
pub const DEFAULT_HEALTH_THRESHOLD: f64 = 0.7;

// ============================================================================
// Router Errors
// ============================================================================

/// Errors from the fallback router
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouterError {
    /// Every candidate was tried and failed
    #[error("all {attempted} providers failed; last error: {last_error}")]
    AllProvidersFailed {
        /// Number of providers tried
        attempted: usize,
        /// Error message from the last provider tried
        last_error: String,
    },

    /// No providers are registered
    #[error("no providers registered")]
    NoProviders,
}

// ============================================================================
// Strategy and Config
// ============================================================================

/// Candidate ordering strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Highest quality first
    #[default]
    QualityFirst,
    /// Fastest first
    SpeedFirst,
    /// Cheapest per token first
    CostOptimized,
}

impl RoutingStrategy {
    /// Parse a strategy name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "quality_first" | "quality" => Some(Self::QualityFirst),
            "speed_first" | "speed" => Some(Self::SpeedFirst),
            "cost_optimized" | "cost" => Some(Self::CostOptimized),
            _ => None,
        }
    }

    /// Sort `candidates` in place. Stable, so ties keep their order.
    fn order(self, candidates: &mut [Arc<ProviderEntry>]) {
        match self {
            Self::QualityFirst => {
                candidates.sort_by(|a, b| b.profile().quality.total_cmp(&a.profile().quality));
            }
            Self::SpeedFirst => {
                candidates.sort_by(|a, b| b.profile().speed.total_cmp(&a.profile().speed));
            }
            Self::CostOptimized => candidates.sort_by(|a, b| {
                a.profile()
                    .effective_cost_per_1k()
                    .total_cmp(&b.profile().effective_cost_per_1k())
            }),
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::QualityFirst => "quality_first",
            Self::SpeedFirst => "speed_first",
            Self::CostOptimized => "cost_optimized",
        };
        f.write_str(label)
    }
}

/// Router settings
#[derive(Clone, Debug, PartialEq)]
pub struct RouterConfig {
    /// Time budget for each provider call
    pub provider_timeout: Duration,
    /// Success rate above which a provider is healthy
    pub health_threshold: f64,
    /// Strategy used when a request names none
    pub default_strategy: RoutingStrategy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            health_threshold: DEFAULT_HEALTH_THRESHOLD,
            default_strategy: RoutingStrategy::default(),
        }
    }
}

// ============================================================================
// Request and Result
// ============================================================================

/// A generation request as seen by the router
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationRequest {
    /// User prompt
    pub prompt: String,
    /// Provider name or model to prefer
    pub model_preference: Option<String>,
    /// Maximum tokens in response (0 = provider default)
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// System prompt (optional)
    pub system_prompt: Option<String>,
    /// Ordering strategy; `None` uses the router default
    pub strategy: Option<RoutingStrategy>,
}

impl GenerationRequest {
    /// Create a request for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.7,
            ..Default::default()
        }
    }

    /// Prefer a provider (by name) or a model
    pub fn with_preference(mut self, preference: impl Into<String>) -> Self {
        self.model_preference = Some(preference.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set ordering strategy
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Outcome of a successful routed generation
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationResult {
    /// Generated text
    pub content: String,
    /// Provider that served the call
    pub provider: String,
    /// Model that served the call
    pub model: String,
    /// Tokens consumed
    pub tokens_used: u64,
    /// Dollar cost
    pub cost: f64,
    /// Latency of the successful call
    pub latency_ms: u64,
    /// 1-based position of the successful provider in the trial order
    pub attempt_number: u32,
    /// Whether an earlier candidate failed first
    pub fallback_used: bool,
}

/// Health summary for one provider
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Provider name
    pub name: String,
    /// Closed breaker and success rate above threshold
    pub healthy: bool,
    /// Breaker state
    pub breaker_state: CircuitState,
    /// successful / total calls
    pub success_rate: f64,
    /// Calls attempted
    pub total_calls: u64,
}

// ============================================================================
// Router Stats
// ============================================================================

#[derive(Debug)]
struct RouterStats {
    total_requests: AtomicU64,
    fallback_requests: AtomicU64,
    exhausted_requests: AtomicU64,
    degraded_requests: AtomicU64,
    latency: Histogram,
}

impl Default for RouterStats {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            fallback_requests: AtomicU64::new(0),
            exhausted_requests: AtomicU64::new(0),
            degraded_requests: AtomicU64::new(0),
            latency: Histogram::latency_default(),
        }
    }
}

/// Router-level counters
#[derive(Clone, Debug, Serialize)]
pub struct RouterStatsSnapshot {
    /// Requests routed
    pub total_requests: u64,
    /// Requests served by a non-first candidate
    pub fallback_requests: u64,
    /// Requests where every candidate failed
    pub exhausted_requests: u64,
    /// Requests that ran with every breaker open
    pub degraded_requests: u64,
    /// End-to-end latency of successful requests
    pub latency: HistogramSnapshot,
}

// ============================================================================
// Fallback Router
// ============================================================================

/// Routes generation requests across providers with failover
pub struct FallbackRouter {
    providers: Arc<ProviderRegistry>,
    config: RouterConfig,
    stats: RouterStats,
}

impl FallbackRouter {
    /// Create a router over a provider registry
    pub fn new(providers: Arc<ProviderRegistry>, config: RouterConfig) -> Self {
        Self {
            providers,
            config,
            stats: RouterStats::default(),
        }
    }

    /// The provider registry
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Router settings
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Generate with failover
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, RouterError> {
        let all = self.providers.list();
        if all.is_empty() {
            return Err(RouterError::NoProviders);
        }
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let healthy: Vec<_> = all
            .iter()
            .filter(|p| p.breaker().can_attempt())
            .cloned()
            .collect();
        let mut candidates = if healthy.is_empty() {
            tracing::warn!(
                providers = all.len(),
                "All provider breakers open, attempting full list"
            );
            self.stats.degraded_requests.fetch_add(1, Ordering::Relaxed);
            all
        } else {
            healthy
        };

        let strategy = request.strategy.unwrap_or(self.config.default_strategy);
        strategy.order(&mut candidates);
        let model = apply_preference(&mut candidates, request.model_preference.as_deref());

        let provider_request = ProviderRequest {
            prompt: request.prompt,
            model,
            system_prompt: request.system_prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            timeout: self.config.provider_timeout,
        };

        let mut last_error = String::new();
        for (i, entry) in candidates.iter().enumerate() {
            let attempt_number = i as u32 + 1;
            let call_started = Instant::now();

            match self.call_provider(entry, &provider_request).await {
                Ok(output) => {
                    let latency = call_started.elapsed();
                    let cost = entry.record_success(output.tokens_used, latency);
                    let fallback_used = attempt_number > 1;
                    if fallback_used {
                        self.stats.fallback_requests.fetch_add(1, Ordering::Relaxed);
                    }
                    self.stats.latency.record(started.elapsed());

                    tracing::debug!(
                        provider = %entry.name(),
                        attempt = attempt_number,
                        tokens = output.tokens_used,
                        latency_ms = latency.as_millis() as u64,
                        "Generation succeeded"
                    );

                    return Ok(GenerationResult {
                        content: output.content,
                        provider: entry.name().to_string(),
                        model: output.model,
                        tokens_used: output.tokens_used,
                        cost,
                        latency_ms: latency.as_millis() as u64,
                        attempt_number,
                        fallback_used,
                    });
                }
                Err(error) => {
                    entry.record_failure(&error, call_started.elapsed());
                    tracing::warn!(
                        provider = %entry.name(),
                        attempt = attempt_number,
                        error = %error,
                        "Provider failed, trying next"
                    );
                    last_error = error;
                }
            }
        }

        self.stats.exhausted_requests.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            attempted = candidates.len(),
            last_error = %last_error,
            "All providers failed"
        );
        Err(RouterError::AllProvidersFailed {
            attempted: candidates.len(),
            last_error,
        })
    }

    /// One provider call, isolated on its own task and bounded by the timeout
    async fn call_provider(
        &self,
        entry: &ProviderEntry,
        request: &ProviderRequest,
    ) -> Result<ProviderOutput, String> {
        let provider = entry.provider().clone();
        let owned = request.clone();
        let mut handle = tokio::spawn(async move { provider.generate(&owned).await });
        // Covers both the timeout and a caller that drops `generate`
        let _abort = AbortOnDrop(handle.abort_handle());

        match tokio::time::timeout(request.timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) => Err(format!("provider {}", join_error_message(join_error))),
            Err(_) => Err(ProviderError::Timeout(request.timeout).to_string()),
        }
    }

    /// Closed breaker, at least one call, and success rate above threshold
    pub fn is_healthy(&self, name: &str) -> bool {
        self.providers
            .get(name)
            .map(|entry| self.health_of(&entry).healthy)
            .unwrap_or(false)
    }

    fn health_of(&self, entry: &ProviderEntry) -> ProviderHealth {
        let stats = entry.stats();
        let state = entry.breaker().state();
        let success_rate = stats.success_rate();
        ProviderHealth {
            name: entry.name().to_string(),
            healthy: state == CircuitState::Closed
                && stats.total_calls > 0
                && success_rate > self.config.health_threshold,
            breaker_state: state,
            success_rate,
            total_calls: stats.total_calls,
        }
    }

    /// Health of every provider, in registration order
    pub fn get_provider_health(&self) -> Vec<ProviderHealth> {
        self.providers
            .list()
            .iter()
            .map(|entry| self.health_of(entry))
            .collect()
    }

    /// Raw counters and breaker state for every provider
    pub fn get_provider_stats(&self) -> Vec<ProviderStatsSnapshot> {
        self.providers.list().iter().map(|e| e.snapshot()).collect()
    }

    /// Router-level counters
    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            fallback_requests: self.stats.fallback_requests.load(Ordering::Relaxed),
            exhausted_requests: self.stats.exhausted_requests.load(Ordering::Relaxed),
            degraded_requests: self.stats.degraded_requests.load(Ordering::Relaxed),
            latency: self.stats.latency.snapshot(),
        }
    }
}

/// Move the preferred candidate to the front and pick the model to request.
///
/// A preference naming a provider leaves the model unset; anything else is
/// treated as a model id.
fn apply_preference(
    candidates: &mut Vec<Arc<ProviderEntry>>,
    preference: Option<&str>,
) -> Option<String> {
    let preference = preference?;

    if let Some(pos) = candidates.iter().position(|c| c.name() == preference) {
        let preferred = candidates.remove(pos);
        candidates.insert(0, preferred);
        return None;
    }

    if let Some(pos) = candidates
        .iter()
        .position(|c| c.provider().default_model() == preference)
    {
        let preferred = candidates.remove(pos);
        candidates.insert(0, preferred);
    }
    Some(preference.to_string())
}

// ============================================================================
// Tests
// ============================================================================
