//! # Handoff Core
//!
//! Domain types, traits, and error definitions for the Handoff multi-agent
//! orchestrator. Agents, messages, tools and the provider contract live here;
//! the turn loop that drives them lives in `handoff-agent`.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping the model backend via configuration
//! - Easy testing with scripted providers and closure tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod response;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, Instructions};
pub use context::{CONTEXT_VARIABLES_PARAM, ContextVariables};
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{FunctionCall, Message, Role, ToolCall};
pub use provider::{
    CompletionRequest, CompletionResponse, DeltaReceiver, FunctionDelta, MessageDelta, Provider,
    ToolCallDelta, ToolDefinition, Usage,
};
pub use response::{Delimiter, PartialResponse, Response, StreamEvent};
pub use tool::{AgentFunction, FunctionTool, ToolArgs, ToolOutput, ToolResult};
