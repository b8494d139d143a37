//! Tool trait: the functions an agent exposes to the model.
//!
//! A tool receives the model's parsed JSON arguments and returns a
//! [`ToolOutput`]. Tools that declare [`AgentFunction::wants_context`] also
//! receive the run's context variables under the reserved
//! [`CONTEXT_VARIABLES_PARAM`] argument, which is never shown to the model.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::agent::Agent;
use crate::context::{CONTEXT_VARIABLES_PARAM, ContextVariables};
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Parsed tool-call arguments.
pub type ToolArgs = Map<String, Value>;

/// Everything a tool may hand back to the dispatcher.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Plain text shown to the model.
    Text(String),
    /// Shorthand for "transfer the conversation to this agent".
    Handoff(Arc<Agent>),
    /// Full control over value, next agent and context updates.
    Result(ToolResult),
    /// Any other JSON value; rendered as text for the model.
    Value(Value),
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Arc<Agent>> for ToolOutput {
    fn from(agent: Arc<Agent>) -> Self {
        Self::Handoff(agent)
    }
}

impl From<Agent> for ToolOutput {
    fn from(agent: Agent) -> Self {
        Self::Handoff(Arc::new(agent))
    }
}

impl From<ToolResult> for ToolOutput {
    fn from(result: ToolResult) -> Self {
        Self::Result(result)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// The normalized outcome of one tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    /// Text placed in the tool message
    pub value: String,

    /// Agent to hand off to after this batch of tool calls
    pub agent: Option<Arc<Agent>>,

    /// Context updates to merge into the run
    pub context_variables: ContextVariables,
}

impl ToolResult {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_context_variables(mut self, context_variables: ContextVariables) -> Self {
        self.context_variables = context_variables;
        self
    }
}

/// A function the model can call.
#[async_trait]
pub trait AgentFunction: Send + Sync {
    /// The unique name of this tool (sent to the model).
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    }

    /// Whether the dispatcher should inject the context variables.
    fn wants_context(&self) -> bool {
        false
    }

    /// Execute the tool.
    async fn call(&self, arguments: ToolArgs) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a definition for the model, with the reserved
    /// context parameter hidden.
    fn to_definition(&self) -> ToolDefinition {
        let mut parameters = self.parameters_schema();
        hide_context_param(&mut parameters);
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters,
        }
    }
}

fn hide_context_param(schema: &mut Value) {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        properties.remove(CONTEXT_VARIABLES_PARAM);
    }
    if let Some(required) = schema.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|name| name != CONTEXT_VARIABLES_PARAM);
    }
}

/// Recursively drop string-valued `title` keys that schema generators add.
pub fn remove_titles(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if map.get("title").is_some_and(Value::is_string) {
                map.remove("title");
            }
            for value in map.values_mut() {
                remove_titles(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(remove_titles),
        _ => {}
    }
}

type Handler = dyn Fn(ToolArgs) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync;

/// An [`AgentFunction`] backed by a closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    wants_context: bool,
    handler: Arc<Handler>,
}

impl FunctionTool {
    /// A tool that receives the raw argument map.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        f: F,
    ) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            wants_context: false,
            handler: Arc::new(
                move |args: ToolArgs| -> BoxFuture<'static, Result<ToolOutput, ToolError>> {
                    Box::pin(f(args))
                },
            ),
        }
    }

    /// A tool whose arguments deserialize into `A`. The schema is generated
    /// from `A`; arguments that do not fit `A` are rejected as invalid.
    pub fn typed<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let name = name.into();
        let mut schema = serde_json::to_value(schemars::schema_for!(A))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        if let Some(map) = schema.as_object_mut() {
            map.remove("$schema");
        }
        remove_titles(&mut schema);

        let f = Arc::new(f);
        let tool_name = name.clone();
        let handler = move |args: ToolArgs| -> BoxFuture<'static, Result<ToolOutput, ToolError>> {
            let f = Arc::clone(&f);
            let tool_name = tool_name.clone();
            Box::pin(async move {
                let parsed: A = serde_json::from_value(Value::Object(args)).map_err(|e| {
                    ToolError::InvalidArguments {
                        tool_name,
                        reason: e.to_string(),
                    }
                })?;
                f(parsed).await
            })
        };

        Self {
            name,
            description: description.into(),
            schema,
            wants_context: false,
            handler: Arc::new(handler),
        }
    }

    /// Receive the run's context variables as `context_variables`.
    pub fn with_context(mut self) -> Self {
        self.wants_context = true;
        self
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("wants_context", &self.wants_context)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentFunction for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn wants_context(&self) -> bool {
        self.wants_context
    }

    async fn call(&self, arguments: ToolArgs) -> Result<ToolOutput, ToolError> {
        (self.handler)(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl AgentFunction for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "context_variables": { "type": "object" }
                },
                "required": ["text", "context_variables"]
            })
        }
        fn wants_context(&self) -> bool {
            true
        }
        async fn call(&self, arguments: ToolArgs) -> Result<ToolOutput, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").into())
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct WeatherArgs {
        /// City to look up
        location: String,
        #[serde(default)]
        unit: Option<String>,
    }

    #[test]
    fn definition_hides_context_parameter() {
        let def = EchoTool.to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.description, "Echoes back the input");
        assert!(def.parameters["properties"].get("context_variables").is_none());
        assert_eq!(def.parameters["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn trait_object_call() {
        let tool: Arc<dyn AgentFunction> = Arc::new(EchoTool);
        let mut args = ToolArgs::new();
        args.insert("text".into(), json!("hello world"));
        match tool.call(args).await.unwrap() {
            ToolOutput::Text(text) => assert_eq!(text, "hello world"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn typed_tool_generates_schema_without_titles() {
        let tool = FunctionTool::typed("get_weather", "Look up weather", |args: WeatherArgs| async move {
            Ok(ToolOutput::from(format!("sunny in {}", args.location)))
        });
        let schema = tool.parameters_schema();
        assert!(schema.get("title").is_none());
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["location"]["type"], "string");
        assert_eq!(schema["required"], json!(["location"]));
    }

    #[tokio::test]
    async fn typed_tool_rejects_bad_arguments() {
        let tool = FunctionTool::typed("get_weather", "", |args: WeatherArgs| async move {
            Ok(ToolOutput::from(args.location))
        });
        let mut args = ToolArgs::new();
        args.insert("location".into(), json!(12));
        let err = tool.call(args).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { ref tool_name, .. } if tool_name == "get_weather"));
    }

    #[tokio::test]
    async fn typed_tool_runs_closure() {
        let tool = FunctionTool::typed("get_weather", "", |args: WeatherArgs| async move {
            Ok(ToolOutput::from(format!(
                "{} {}",
                args.location,
                args.unit.unwrap_or_else(|| "C".into())
            )))
        });
        let mut args = ToolArgs::new();
        args.insert("location".into(), json!("Oslo"));
        match tool.call(args).await.unwrap() {
            ToolOutput::Text(text) => assert_eq!(text, "Oslo C"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn remove_titles_keeps_properties_named_title() {
        let mut schema = json!({
            "title": "Book",
            "type": "object",
            "properties": {
                "title": { "title": "Title", "type": "string" }
            }
        });
        remove_titles(&mut schema);
        assert!(schema.get("title").is_none());
        assert_eq!(schema["properties"]["title"], json!({ "type": "string" }));
    }

    #[test]
    fn with_context_flags_the_tool() {
        let tool = FunctionTool::new("peek", "", json!({"type": "object"}), |_args| async {
            Ok(ToolOutput::from("ok"))
        });
        assert!(!tool.wants_context());
        assert!(tool.with_context().wants_context());
    }

    #[test]
    fn agent_converts_to_handoff() {
        let output = ToolOutput::from(Agent::new("Refunds"));
        assert!(matches!(output, ToolOutput::Handoff(ref a) if a.name == "Refunds"));
    }
}
