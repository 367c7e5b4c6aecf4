pub mod runtime;
pub mod tools;

pub use runtime::{
    AgentDependencies, AgentRuntime, ChatRequest, ChatResponse, SearchPreferences, SseEvent,
    ToolUsage,
};
pub use tools::{ToolContext, ToolRegistry};
