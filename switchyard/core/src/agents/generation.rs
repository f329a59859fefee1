//! Generation Agent
//!
//! Worker that turns a task into a routed generation request. The prompt is
//! the task description followed by `parameters.prompt`; optional
//! parameters tune the request:
//!
//! | key           | type   | effect                          |
//! |---------------|--------|---------------------------------|
//! | `prompt`      | string | appended to the description     |
//! | `model`       | string | provider name or model to prefer |
//! | `max_tokens`  | int    | response cap                    |
//! | `temperature` | float  | sampling temperature            |
//! | `system`      | string | system prompt override          |
//! | `strategy`    | string | routing strategy override       |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{Agent, AgentError, TaskContext};
use crate::router::{FallbackRouter, GenerationRequest, RoutingStrategy};
use crate::task::Task;

/// Capability served when none is configured
pub const DEFAULT_GENERATION_CAPABILITY: &str = "generate";

/// Agent that forwards tasks to the fallback router
pub struct GenerationAgent {
    id: String,
    capabilities: Vec<String>,
    router: Arc<FallbackRouter>,
    system_prompt: Option<String>,
    strategy: Option<RoutingStrategy>,
}

impl GenerationAgent {
    /// Create an agent serving the `generate` task type
    pub fn new(id: impl Into<String>, router: Arc<FallbackRouter>) -> Self {
        Self {
            id: id.into(),
            capabilities: vec![DEFAULT_GENERATION_CAPABILITY.to_string()],
            router,
            system_prompt: None,
            strategy: None,
        }
    }

    /// Replace the served task types
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Default system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Default routing strategy
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Build the router request for a task
    fn build_request(&self, task: &Task) -> Result<GenerationRequest, AgentError> {
        let params = &task.parameters;
        if !params.is_null() && !params.is_object() {
            return Err(AgentError::InvalidParameters(
                "parameters must be a JSON object".into(),
            ));
        }

        let extra = match params.get("prompt") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                return Err(AgentError::InvalidParameters("`prompt` must be a string".into()))
            }
        };

        let description = task.description.trim();
        let prompt = match (description.is_empty(), extra) {
            (true, None) => {
                return Err(AgentError::InvalidParameters(
                    "task has neither a description nor a prompt".into(),
                ))
            }
            (true, Some(p)) => p.to_string(),
            (false, None) => description.to_string(),
            (false, Some(p)) => format!("{description}\n\n{p}"),
        };

        let mut request = GenerationRequest::new(prompt);

        if let Some(model) = params.get("model").and_then(Value::as_str) {
            request = request.with_preference(model);
        }
        if let Some(max_tokens) = params.get("max_tokens").and_then(Value::as_u64) {
            let max_tokens = u32::try_from(max_tokens)
                .map_err(|_| AgentError::InvalidParameters("`max_tokens` out of range".into()))?;
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = params.get("temperature").and_then(Value::as_f64) {
            request = request.with_temperature(temperature as f32);
        }

        let system = params
            .get("system")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.system_prompt.clone());
        if let Some(system) = system {
            request = request.with_system(system);
        }

        let strategy = match params.get("strategy").and_then(Value::as_str) {
            Some(name) => Some(RoutingStrategy::parse(name).ok_or_else(|| {
                AgentError::InvalidParameters(format!("unknown strategy `{name}`"))
            })?),
            None => self.strategy,
        };
        if let Some(strategy) = strategy {
            request = request.with_strategy(strategy);
        }

        Ok(request)
    }
}

#[async_trait]
impl Agent for GenerationAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value, AgentError> {
        let request = self.build_request(task)?;
        ctx.report_progress(10, "routing generation request");

        let result = self.router.generate(request).await?;
        ctx.report_progress(100, format!("generated by {}", result.provider));

        serde_json::to_value(&result).map_err(|e| AgentError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::providers::{GenerationProvider, ProviderError, ProviderOutput, ProviderRequest};
    use crate::registry::{ProviderProfile, ProviderRegistry};
    use crate::router::{RouterConfig, RouterError};
    use crate::task::Priority;
    use serde_json::json;

    struct EchoProvider {
        fail: bool,
    }

    #[async_trait]
    impl GenerationProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }

        async fn generate(&self, request: &ProviderRequest) -> Result<ProviderOutput, ProviderError> {
            if self.fail {
                return Err(ProviderError::Rejected("nope".into()));
            }
            Ok(ProviderOutput {
                content: request.prompt.to_uppercase(),
                tokens_used: 3,
                model: "echo-1".into(),
            })
        }
    }

    fn agent(fail: bool) -> GenerationAgent {
        let registry = Arc::new(ProviderRegistry::default());
        registry
            .register(Arc::new(EchoProvider { fail }), ProviderProfile::default())
            .unwrap();
        let router = Arc::new(FallbackRouter::new(registry, RouterConfig::default()));
        GenerationAgent::new("gen-1", router)
    }

    fn task(description: &str, parameters: Value) -> Task {
        Task::new("generate", description, parameters, Priority::Medium)
    }

    #[test]
    fn test_prompt_building() {
        let agent = agent(false);

        let request = agent.build_request(&task("Summarize", json!({"prompt": "text"}))).unwrap();
        assert_eq!(request.prompt, "Summarize\n\ntext");

        let request = agent.build_request(&task("", json!({"prompt": "only"}))).unwrap();
        assert_eq!(request.prompt, "only");

        let request = agent.build_request(&task("just this", Value::Null)).unwrap();
        assert_eq!(request.prompt, "just this");
    }

    #[test]
    fn test_optional_parameters() {
        let agent = agent(false).with_system("default system");
        let request = agent
            .build_request(&task(
                "x",
                json!({"model": "echo", "max_tokens": 50, "temperature": 0.1, "strategy": "speed_first"}),
            ))
            .unwrap();

        assert_eq!(request.model_preference.as_deref(), Some("echo"));
        assert_eq!(request.max_tokens, 50);
        assert!((request.temperature - 0.1).abs() < 1e-6);
        assert_eq!(request.system_prompt.as_deref(), Some("default system"));
        assert_eq!(request.strategy, Some(RoutingStrategy::SpeedFirst));
    }

    #[test]
    fn test_invalid_parameters() {
        let agent = agent(false);
        for params in [
            json!({"prompt": 42}),
            json!({"strategy": "whatever"}),
            json!(["not", "an", "object"]),
        ] {
            let err = agent.build_request(&task("x", params)).unwrap_err();
            assert!(matches!(err, AgentError::InvalidParameters(_)));
        }

        let err = agent.build_request(&task("  ", Value::Null)).unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_execute_returns_generation_result() {
        let agent = agent(false);
        let t = task("hello", Value::Null);
        let ctx = TaskContext::new(t.id, agent.id(), EventBus::default());

        let value = agent.execute(&t, &ctx).await.unwrap();
        assert_eq!(value["content"], json!("HELLO"));
        assert_eq!(value["provider"], json!("echo"));
        assert_eq!(value["attempt_number"], json!(1));
        assert_eq!(value["fallback_used"], json!(false));
    }

    #[tokio::test]
    async fn test_execute_propagates_router_error() {
        let agent = agent(true);
        let t = task("hello", Value::Null);
        let ctx = TaskContext::new(t.id, agent.id(), EventBus::default());

        let err = agent.execute(&t, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Generation(RouterError::AllProvidersFailed { attempted: 1, .. })
        ));
    }

    #[test]
    fn test_custom_capabilities() {
        let agent = agent(false).with_capabilities(["summarize", "translate"]);
        assert_eq!(agent.capabilities(), &["summarize".to_string(), "translate".to_string()]);
    }
}
