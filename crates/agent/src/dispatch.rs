//! Executes the tool calls of one assistant turn.
//!
//! Calls run one after another in the order the model listed them. An
//! unknown tool name is reported back to the model as a tool message; every
//! other failure ends the run. Argument strings must be JSON objects, so an
//! empty string is rejected like any other malformed payload.

use std::collections::HashMap;
use std::sync::Arc;

use handoff_core::context::{CONTEXT_VARIABLES_PARAM, ContextVariables};
use handoff_core::error::{Result, ToolError};
use handoff_core::message::{Message, ToolCall};
use handoff_core::response::PartialResponse;
use handoff_core::tool::{AgentFunction, ToolArgs, ToolOutput, ToolResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Run `tool_calls` against `functions` and collect the tool messages, the
/// hand-off target and the context updates they produce.
pub async fn handle_tool_calls(
    tool_calls: &[ToolCall],
    functions: &[Arc<dyn AgentFunction>],
    context_variables: &ContextVariables,
) -> Result<PartialResponse> {
    let function_map: HashMap<&str, &Arc<dyn AgentFunction>> =
        functions.iter().map(|f| (f.name(), f)).collect();

    let mut partial = PartialResponse::default();

    for call in tool_calls {
        let name = call.name();

        let Some(function) = function_map.get(name) else {
            warn!(tool = %name, "Tool not found in function map");
            partial.messages.push(Message::tool_result(
                &call.id,
                name,
                format!("Error: Tool {name} not found."),
            ));
            continue;
        };

        let mut arguments = parse_arguments(name, &call.function.arguments)?;
        if function.wants_context() {
            let visible = context_variables.overlaid(&partial.context_variables);
            arguments.insert(CONTEXT_VARIABLES_PARAM.to_string(), visible.into_value());
        }

        debug!(tool = %name, call_id = %call.id, "Processing tool call");
        let output = function.call(arguments).await?;
        let result = normalize(output);

        partial
            .messages
            .push(Message::tool_result(&call.id, name, result.value));
        partial.context_variables.merge(&result.context_variables);
        if let Some(agent) = result.agent {
            debug!(tool = %name, agent = %agent.name, "Tool returned a hand-off");
            partial.agent = Some(agent);
        }
    }

    Ok(partial)
}

/// Parse the model's argument string into an object.
fn parse_arguments(tool_name: &str, raw: &str) -> std::result::Result<ToolArgs, ToolError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(ToolError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Turn whatever a tool returned into a [`ToolResult`].
///
/// Strings pass through verbatim; any other JSON value, `null` included, is
/// rendered as compact JSON text.
pub fn normalize(output: ToolOutput) -> ToolResult {
    match output {
        ToolOutput::Text(text) => ToolResult::new(text),
        ToolOutput::Handoff(agent) => {
            let value = serde_json::json!({ "assistant": agent.name }).to_string();
            ToolResult::new(value).with_agent(agent)
        }
        ToolOutput::Result(result) => result,
        ToolOutput::Value(Value::String(text)) => ToolResult::new(text),
        ToolOutput::Value(other) => ToolResult::new(other.to_string()),
    }
}
