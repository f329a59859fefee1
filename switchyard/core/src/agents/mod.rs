//! Agents
//!
//! Workers that execute tasks. The orchestrator matches a task's type against
//! each agent's capabilities and calls [`Agent::execute`].
//!
//! # Available Agents
//!
//! - **GenerationAgent**: forwards the task to the fallback router

mod generation;
mod traits;

pub use generation::{GenerationAgent, DEFAULT_GENERATION_CAPABILITY};
pub use traits::{Agent, AgentError, TaskContext};
