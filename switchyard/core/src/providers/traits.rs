//! Generation Provider Traits
//!
//! The contract the fallback router consumes. Each external generation
//! backend (Ollama, a hosted API, a test double) implements
//! [`GenerationProvider`]; the router handles ordering, health and failover.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Default per-call timeout enforced by the router
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(45);

/// A single generation call
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    /// User prompt
    pub prompt: String,
    /// Requested model; `None` means the provider's default
    pub model: Option<String>,
    /// System prompt (optional)
    pub system_prompt: Option<String>,
    /// Maximum tokens in response (0 = provider default)
    pub max_tokens: u32,
    /// Sampling temperature (0.0-1.0)
    pub temperature: f32,
    /// Time budget for the call
    pub timeout: Duration,
}

impl Default for ProviderRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: None,
            system_prompt: None,
            max_tokens: 0,
            temperature: 0.7,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

impl ProviderRequest {
    /// Create a request for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Request a specific model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
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

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Successful provider response
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderOutput {
    /// Generated text
    pub content: String,
    /// Tokens consumed by the call
    pub tokens_used: u64,
    /// Model that actually served the call
    pub model: String,
}

/// Provider call failure
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Backend answered with a non-success status
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The call exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered but the response was unusable
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Generation backend
///
/// Implement this trait to plug a backend into the fallback router.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Unique provider name
    fn name(&self) -> &str;

    /// Model used when the request names none
    fn default_model(&self) -> &str;

    /// Run one generation call
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderOutput, ProviderError>;
}
