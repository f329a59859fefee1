//! TOML Configuration File Support
//!
//! Configuration for the orchestrator, the fallback router and their breakers,
//! loaded from `$XDG_CONFIG_HOME/switchyard/switchyard.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`SWITCHYARD_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [agent_breaker]
//! failure_threshold = 5
//! open_timeout_secs = 60
//! half_open_success_threshold = 3
//!
//! [provider_breaker]
//! failure_threshold = 5
//! open_timeout_secs = 60
//! reopen_on_half_open_failure = true
//!
//! [dispatch]
//! loops = 4
//! backoff_base_ms = 100
//! backoff_max_ms = 2000
//! agent_error_cooldown_secs = 30   # 0 = manual recovery
//! starvation_threshold_secs = 300
//!
//! [router]
//! provider_timeout_secs = 45
//! health_threshold = 0.7
//! default_strategy = "quality_first"
//!
//! [[providers]]
//! name = "local"
//! kind = "ollama"
//! base_url = "http://localhost:11434"
//! default_model = "llama3.2"
//! quality = 6.0
//! speed = 8.0
//! cost_per_1k_tokens = 0.0
//!
//! [[agents]]
//! id = "writer"
//! capabilities = ["generate", "summarize"]
//! system_prompt = "You are concise."
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::DEFAULT_GENERATION_CAPABILITY;
use crate::breaker::BreakerConfig;
use crate::orchestrator::DispatchConfig;
use crate::providers::DEFAULT_OLLAMA_PORT;
use crate::registry::ProviderProfile;
use crate::router::{RouterConfig, RoutingStrategy};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SWITCHYARD_";

/// Default number of dispatch loops
pub const DEFAULT_DISPATCH_LOOPS: usize = 4;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Breaker section (`[agent_breaker]` / `[provider_breaker]`)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerToml {
    /// Failures that trip the breaker
    pub failure_threshold: Option<u32>,

    /// Seconds before an open breaker allows a probe
    pub open_timeout_secs: Option<u64>,

    /// Half-open successes needed to close
    pub half_open_success_threshold: Option<u32>,

    /// Reopen on the first failed probe
    pub reopen_on_half_open_failure: Option<bool>,
}

/// Dispatch section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Concurrent dispatch loops
    pub loops: Option<usize>,

    /// First backoff delay in milliseconds
    pub backoff_base_ms: Option<u64>,

    /// Backoff ceiling in milliseconds
    pub backoff_max_ms: Option<u64>,

    /// ERROR agent cooldown in seconds (0 = manual recovery)
    pub agent_error_cooldown_secs: Option<u64>,

    /// Seconds in PENDING before a task is flagged as starving
    pub starvation_threshold_secs: Option<u64>,

    /// Events buffered per subscriber
    pub event_capacity: Option<usize>,
}

/// Router section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Per-call provider timeout in seconds
    pub provider_timeout_secs: Option<u64>,

    /// Success rate above which a provider is healthy
    pub health_threshold: Option<f64>,

    /// `quality_first`, `speed_first` or `cost_optimized`
    pub default_strategy: Option<String>,
}

/// One `[[providers]]` entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Unique provider name
    pub name: String,

    /// Adapter kind (only `ollama`)
    pub kind: Option<String>,

    /// Server base URL
    pub base_url: Option<String>,

    /// Model used when a request names none
    pub default_model: Option<String>,

    /// Relative quality ranking
    pub quality: Option<f64>,

    /// Relative speed ranking
    pub speed: Option<f64>,

    /// Dollars per 1k tokens
    pub cost_per_1k_tokens: Option<f64>,
}

/// One `[[agents]]` entry
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentToml {
    /// Unique agent id
    pub id: String,

    /// Task types served
    pub capabilities: Option<Vec<String>>,

    /// System prompt for generation requests
    pub system_prompt: Option<String>,

    /// Routing strategy for this agent's requests
    pub strategy: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardToml {
    /// Breaker settings for agents
    pub agent_breaker: BreakerToml,

    /// Breaker settings for providers
    pub provider_breaker: BreakerToml,

    /// Dispatch loop settings
    pub dispatch: DispatchToml,

    /// Router settings
    pub router: RouterToml,

    /// Generation providers, in registration order
    pub providers: Vec<ProviderToml>,

    /// Generation agents, in registration order
    pub agents: Vec<AgentToml>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Supported provider adapters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama HTTP API
    Ollama,
}

/// A provider to register at startup
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSpec {
    /// Unique provider name
    pub name: String,
    /// Adapter kind
    pub kind: ProviderKind,
    /// Server base URL
    pub base_url: String,
    /// Default model
    pub default_model: String,
    /// Ranking metadata
    pub profile: ProviderProfile,
}

/// A generation agent to register at startup
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSpec {
    /// Unique agent id
    pub id: String,
    /// Task types served
    pub capabilities: Vec<String>,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Routing strategy
    pub strategy: Option<RoutingStrategy>,
}

/// Fully resolved configuration
///
/// Use [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug)]
pub struct SwitchyardConfig {
    /// Agent breaker settings
    pub agent_breaker: BreakerConfig,

    /// Provider breaker settings
    pub provider_breaker: BreakerConfig,

    /// Dispatch loop settings
    pub dispatch: DispatchConfig,

    /// Number of concurrent dispatch loops
    pub dispatch_loops: usize,

    /// Router settings
    pub router: RouterConfig,

    /// Providers to register
    pub providers: Vec<ProviderSpec>,

    /// Agents to register
    pub agents: Vec<AgentSpec>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            agent_breaker: BreakerConfig::default(),
            provider_breaker: BreakerConfig::default(),
            dispatch: DispatchConfig::default(),
            dispatch_loops: DEFAULT_DISPATCH_LOOPS,
            router: RouterConfig::default(),
            providers: Vec::new(),
            agents: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SwitchyardConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (section, breaker) in [
            ("agent_breaker", &self.agent_breaker),
            ("provider_breaker", &self.provider_breaker),
        ] {
            if breaker.failure_threshold == 0 {
                return Err(invalid(format!("{section}.failure_threshold must be at least 1")));
            }
            if breaker.half_open_success_threshold == 0 {
                return Err(invalid(format!(
                    "{section}.half_open_success_threshold must be at least 1"
                )));
            }
        }

        if self.dispatch_loops == 0 {
            return Err(invalid("dispatch.loops must be at least 1"));
        }
        if self.dispatch.backoff_base > self.dispatch.backoff_max {
            return Err(invalid("dispatch.backoff_base_ms exceeds dispatch.backoff_max_ms"));
        }
        if !(0.0..=1.0).contains(&self.router.health_threshold) {
            return Err(invalid("router.health_threshold must be between 0 and 1"));
        }
        if self.router.provider_timeout.is_zero() {
            return Err(invalid("router.provider_timeout_secs must be positive"));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(invalid("providers entry without a name"));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(invalid(format!("duplicate provider `{}`", provider.name)));
            }
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(invalid("agents entry without an id"));
            }
            if !ids.insert(agent.id.as_str()) {
                return Err(invalid(format!("duplicate agent `{}`", agent.id)));
            }
            if agent.capabilities.is_empty() {
                return Err(invalid(format!("agent `{}` has no capabilities", agent.id)));
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchyard/switchyard.toml` or
/// `~/.config/switchyard/switchyard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchyard").join("switchyard.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<SwitchyardConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the merged result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SwitchyardConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<SwitchyardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SwitchyardConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchyardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                providers = config.providers.len(),
                agents = config.agents.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn apply_breaker_toml(breaker: &mut BreakerConfig, toml: &BreakerToml) {
    if let Some(n) = toml.failure_threshold {
        breaker.failure_threshold = n;
    }
    if let Some(secs) = toml.open_timeout_secs {
        breaker.open_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = toml.half_open_success_threshold {
        breaker.half_open_success_threshold = n;
    }
    if let Some(reopen) = toml.reopen_on_half_open_failure {
        breaker.reopen_on_half_open_failure = reopen;
    }
}

fn parse_strategy(name: &str, field: &str) -> Result<RoutingStrategy, ConfigError> {
    RoutingStrategy::parse(name).ok_or_else(|| invalid(format!("{field}: unknown strategy `{name}`")))
}

fn cooldown_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut SwitchyardConfig, toml: &SwitchyardToml) -> Result<(), ConfigError> {
    apply_breaker_toml(&mut config.agent_breaker, &toml.agent_breaker);
    apply_breaker_toml(&mut config.provider_breaker, &toml.provider_breaker);

    let dispatch = &toml.dispatch;
    if let Some(loops) = dispatch.loops {
        config.dispatch_loops = loops;
    }
    if let Some(ms) = dispatch.backoff_base_ms {
        config.dispatch.backoff_base = Duration::from_millis(ms);
    }
    if let Some(ms) = dispatch.backoff_max_ms {
        config.dispatch.backoff_max = Duration::from_millis(ms);
    }
    if let Some(secs) = dispatch.agent_error_cooldown_secs {
        config.dispatch.agent_error_cooldown = cooldown_from_secs(secs);
    }
    if let Some(secs) = dispatch.starvation_threshold_secs {
        config.dispatch.starvation_threshold = Duration::from_secs(secs);
    }
    if let Some(capacity) = dispatch.event_capacity {
        config.dispatch.event_capacity = capacity;
    }

    let router = &toml.router;
    if let Some(secs) = router.provider_timeout_secs {
        config.router.provider_timeout = Duration::from_secs(secs);
    }
    if let Some(threshold) = router.health_threshold {
        config.router.health_threshold = threshold;
    }
    if let Some(ref name) = router.default_strategy {
        config.router.default_strategy = parse_strategy(name, "router.default_strategy")?;
    }

    config.providers = toml
        .providers
        .iter()
        .map(provider_spec)
        .collect::<Result<_, _>>()?;
    config.agents = toml
        .agents
        .iter()
        .map(agent_spec)
        .collect::<Result<_, _>>()?;

    Ok(())
}

fn provider_spec(toml: &ProviderToml) -> Result<ProviderSpec, ConfigError> {
    let kind = match toml.kind.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("ollama") => ProviderKind::Ollama,
        Some(other) => {
            return Err(invalid(format!(
                "provider `{}`: unknown kind `{other}`",
                toml.name
            )))
        }
    };

    let defaults = ProviderProfile::default();
    Ok(ProviderSpec {
        name: toml.name.clone(),
        kind,
        base_url: toml
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{DEFAULT_OLLAMA_PORT}")),
        default_model: toml
            .default_model
            .clone()
            .unwrap_or_else(|| "llama3.2".to_string()),
        profile: ProviderProfile {
            quality: toml.quality.unwrap_or(defaults.quality),
            speed: toml.speed.unwrap_or(defaults.speed),
            cost_per_1k_tokens: toml.cost_per_1k_tokens,
        },
    })
}

fn agent_spec(toml: &AgentToml) -> Result<AgentSpec, ConfigError> {
    let strategy = toml
        .strategy
        .as_deref()
        .map(|name| parse_strategy(name, &format!("agent `{}`", toml.id)))
        .transpose()?;

    Ok(AgentSpec {
        id: toml.id.clone(),
        capabilities: toml
            .capabilities
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_GENERATION_CAPABILITY.to_string()]),
        system_prompt: toml.system_prompt.clone(),
        strategy,
    })
}

fn env_parse<T, F>(env: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{name}");
    match env(&key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(format!("{key}: cannot parse `{raw}`"))),
    }
}

/// Apply `SWITCHYARD_*` environment overrides
fn apply_env_config<F>(config: &mut SwitchyardConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;

    if let Some(loops) = env_parse::<usize, _>(&env, "DISPATCH_LOOPS")? {
        config.dispatch_loops = loops;
        touched = true;
    }
    if let Some(secs) = env_parse::<u64, _>(&env, "AGENT_ERROR_COOLDOWN_SECS")? {
        config.dispatch.agent_error_cooldown = cooldown_from_secs(secs);
        touched = true;
    }
    if let Some(secs) = env_parse::<u64, _>(&env, "STARVATION_THRESHOLD_SECS")? {
        config.dispatch.starvation_threshold = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(n) = env_parse::<u32, _>(&env, "AGENT_FAILURE_THRESHOLD")? {
        config.agent_breaker.failure_threshold = n;
        touched = true;
    }
    if let Some(n) = env_parse::<u32, _>(&env, "PROVIDER_FAILURE_THRESHOLD")? {
        config.provider_breaker.failure_threshold = n;
        touched = true;
    }
    if let Some(secs) = env_parse::<u64, _>(&env, "PROVIDER_TIMEOUT_SECS")? {
        config.router.provider_timeout = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(threshold) = env_parse::<f64, _>(&env, "HEALTH_THRESHOLD")? {
        config.router.health_threshold = threshold;
        touched = true;
    }
    if let Some(name) = env(&format!("{ENV_PREFIX}DEFAULT_STRATEGY")) {
        config.router.default_strategy = parse_strategy(&name, "SWITCHYARD_DEFAULT_STRATEGY")?;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Dispatch loop count override
    pub dispatch_loops: Option<usize>,

    /// Provider timeout override (seconds)
    pub provider_timeout_secs: Option<u64>,

    /// Default strategy override
    pub default_strategy: Option<RoutingStrategy>,

    /// Starvation threshold override (seconds)
    pub starvation_threshold_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set dispatch loop count override
    #[must_use]
    pub fn with_dispatch_loops(mut self, loops: usize) -> Self {
        self.dispatch_loops = Some(loops);
        self
    }

    /// Set provider timeout override
    #[must_use]
    pub fn with_provider_timeout_secs(mut self, secs: u64) -> Self {
        self.provider_timeout_secs = Some(secs);
        self
    }

    /// Set default strategy override
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.default_strategy = Some(strategy);
        self
    }

    /// Set starvation threshold override
    #[must_use]
    pub fn with_starvation_threshold_secs(mut self, secs: u64) -> Self {
        self.starvation_threshold_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut SwitchyardConfig) {
        if self.dispatch_loops.is_some()
            || self.provider_timeout_secs.is_some()
            || self.default_strategy.is_some()
            || self.starvation_threshold_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(loops) = self.dispatch_loops {
            config.dispatch_loops = loops;
        }
        if let Some(secs) = self.provider_timeout_secs {
            config.router.provider_timeout = Duration::from_secs(secs);
        }
        if let Some(strategy) = self.default_strategy {
            config.router.default_strategy = strategy;
        }
        if let Some(secs) = self.starvation_threshold_secs {
            config.dispatch.starvation_threshold = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
