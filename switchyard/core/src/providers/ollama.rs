//! Ollama Provider
//!
//! Generation provider for Ollama (local LLM server), using the non-streaming
//! `/api/generate` endpoint.

use async_trait::async_trait;

use super::traits::{GenerationProvider, ProviderError, ProviderOutput, ProviderRequest};

/// Default Ollama port
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Longest response body kept in an HTTP error
const MAX_ERROR_BODY: usize = 512;

/// Ollama HTTP provider
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    /// Registry name
    name: String,
    /// Server base URL, e.g. `http://localhost:11434`
    base_url: String,
    /// Model used when the request names none
    default_model: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider against `base_url`
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Create from `OLLAMA_HOST` / `OLLAMA_PORT`, defaulting to localhost
    #[must_use]
    pub fn from_env(default_model: impl Into<String>) -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_OLLAMA_PORT);

        Self::new("ollama", format!("http://{host}:{port}"), default_model)
    }

    /// Server base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// JSON body for a generate call
    fn build_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut options = serde_json::Map::new();
        options.insert("temperature".into(), serde_json::json!(request.temperature));
        if request.max_tokens > 0 {
            options.insert("num_predict".into(), serde_json::json!(request.max_tokens));
        }

        let mut body = serde_json::json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": options,
        });
        if let Some(ref system) = request.system_prompt {
            body["system"] = serde_json::json!(system);
        }
        body
    }

    fn transport_error(&self, err: reqwest::Error, request: &ProviderRequest) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(request.timeout)
        } else {
            ProviderError::Transport(format!("{}: {err}", self.name))
        }
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderOutput, ProviderError> {
        let body = self.build_body(request);

        let response = self
            .http_client
            .post(self.generate_url())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, request))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: self.name.clone(),
                status: status.as_u16(),
                body: clip_error_body(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.transport_error(e, request))?;

        parse_generate_response(&data, &body)
    }
}

/// Cut `text` to at most `MAX_ERROR_BODY` bytes on a char boundary
fn clip_error_body(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let cut = text
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= MAX_ERROR_BODY)
            .last()
            .unwrap_or(0);
        text.truncate(cut);
    }
    text
}

/// Extract content, token count and model from a `/api/generate` reply
fn parse_generate_response(
    data: &serde_json::Value,
    sent: &serde_json::Value,
) -> Result<ProviderOutput, ProviderError> {
    if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
        return Err(ProviderError::Rejected(error.to_string()));
    }

    let content = data
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| ProviderError::Rejected("response missing `response` field".into()))?
        .to_string();

    let tokens_used = data
        .get("eval_count")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);

    let model = data
        .get("model")
        .or_else(|| sent.get("model"))
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(ProviderOutput {
        content,
        tokens_used,
        model,
    })
}
