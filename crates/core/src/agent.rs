//! Agent configuration types.
//!
//! An [`Agent`] is a named, immutable model configuration. Runs share agents
//! as `Arc<Agent>`; a hand-off swaps which `Arc` is active and never touches
//! the agent itself.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::ContextVariables;
use crate::provider::ToolDefinition;
use crate::tool::AgentFunction;

/// Renders instructions from the current context variables.
pub type InstructionsFn = dyn Fn(ContextVariables) -> BoxFuture<'static, String> + Send + Sync;

/// System instructions for an agent.
#[derive(Clone)]
pub enum Instructions {
    /// Fixed text.
    Static(String),
    /// Computed from the context variables at the start of every turn.
    /// The computation may await (e.g. to load a profile).
    Computed(Arc<InstructionsFn>),
}

impl Instructions {
    /// Instructions computed synchronously from the context.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&ContextVariables) -> String + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(
            move |ctx: ContextVariables| -> BoxFuture<'static, String> {
                let text = f(&ctx);
                Box::pin(async move { text })
            },
        ))
    }

    /// Instructions computed by an async function of the context.
    pub fn computed_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ContextVariables) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        Self::Computed(Arc::new(
            move |ctx: ContextVariables| -> BoxFuture<'static, String> { Box::pin(f(ctx)) },
        ))
    }

    /// Produce the instruction text for the given context.
    pub async fn render(&self, context_variables: &ContextVariables) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Computed(f) => f(context_variables.clone()).await,
        }
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Self::Static(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Self::Static(text)
    }
}

/// A named model configuration: instructions, tools and tool-choice policy.
#[derive(Clone)]
pub struct Agent {
    pub name: String,

    /// Model identifier sent to the provider (unless the run overrides it)
    pub model: String,

    pub instructions: Instructions,

    /// Tools the model may call while this agent is active, in order
    pub functions: Vec<Arc<dyn AgentFunction>>,

    /// Passed through to the provider (`"auto"`, `"required"`, `"none"`, ...)
    pub tool_choice: Option<String>,

    /// Whether the model may request several tool calls in one turn
    pub parallel_tool_calls: bool,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            name: "Agent".into(),
            model: "gpt-4o".into(),
            instructions: Instructions::Static("You are a helpful agent.".into()),
            functions: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: true,
        }
    }
}

impl Agent {
    /// Create an agent with default model and instructions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Add a tool. Order is preserved in the definitions sent to the model.
    pub fn with_function(mut self, function: impl AgentFunction + 'static) -> Self {
        self.functions.push(Arc::new(function));
        self
    }

    /// Add an already shared tool.
    pub fn with_shared_function(mut self, function: Arc<dyn AgentFunction>) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: impl Into<String>) -> Self {
        self.tool_choice = Some(tool_choice.into());
        self
    }

    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = enabled;
        self
    }

    /// Model-facing definitions of this agent's tools.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.functions.iter().map(|f| f.to_definition()).collect()
    }

    /// Freeze the agent for sharing between runs and hand-offs.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions: Vec<&str> = self.functions.iter().map(|t| t.name()).collect();
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("instructions", &self.instructions)
            .field("functions", &functions)
            .field("tool_choice", &self.tool_choice)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_plain_helpful_agent() {
        let agent = Agent::default();
        assert_eq!(agent.name, "Agent");
        assert_eq!(agent.model, "gpt-4o");
        assert!(agent.functions.is_empty());
        assert!(agent.tool_choice.is_none());
        assert!(agent.parallel_tool_calls);
    }

    #[tokio::test]
    async fn static_instructions_render_verbatim() {
        let instructions = Instructions::from("Be brief.");
        assert_eq!(instructions.render(&ContextVariables::new()).await, "Be brief.");
    }

    #[tokio::test]
    async fn computed_instructions_see_context() {
        let instructions =
            Instructions::computed(|ctx| format!("Help {} politely.", ctx.get_str("user_name")));
        let ctx = ContextVariables::new().with("user_name", "Ada");
        assert_eq!(instructions.render(&ctx).await, "Help Ada politely.");
        // Missing keys read as empty text.
        assert_eq!(
            instructions.render(&ContextVariables::new()).await,
            "Help  politely."
        );
    }

    #[tokio::test]
    async fn async_instructions_are_awaited() {
        let instructions = Instructions::computed_async(|ctx| async move {
            tokio::task::yield_now().await;
            format!("tier={}", ctx.get_str("tier"))
        });
        let ctx = ContextVariables::new().with("tier", "gold");
        assert_eq!(instructions.render(&ctx).await, "tier=gold");
    }

    #[test]
    fn debug_lists_function_names() {
        let agent = Agent::new("Sales");
        let text = format!("{agent:?}");
        assert!(text.contains("Sales"));
        assert!(text.contains("Static"));
    }
}
