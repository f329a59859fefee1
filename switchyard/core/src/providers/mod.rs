//! Generation Providers
//!
//! Abstracted access to generation backends through a common trait.
//!
//! # Available Providers
//!
//! - **Ollama**: local LLM server over HTTP
//!
//! # Usage
//!
//! ```ignore
//! use switchyard_core::providers::{GenerationProvider, OllamaProvider, ProviderRequest};
//!
//! let provider = OllamaProvider::from_env("llama3");
//! let output = provider.generate(&ProviderRequest::new("Hello!")).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::{OllamaProvider, DEFAULT_OLLAMA_PORT};
pub use traits::{
    GenerationProvider, ProviderError, ProviderOutput, ProviderRequest, DEFAULT_PROVIDER_TIMEOUT,
};
