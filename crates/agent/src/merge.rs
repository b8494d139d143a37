//! Accumulates streamed fragments into one assistant message.

use std::collections::BTreeMap;

use handoff_core::message::{FunctionCall, Message, ToolCall};
use handoff_core::provider::{MessageDelta, ToolCallDelta};
use serde_json::Value;
use tracing::warn;

/// A tool call still being assembled from fragments.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    kind: String,
    name: String,
    arguments: String,
}

/// The in-progress assistant message of one streamed turn.
///
/// Tool-call fragments are addressed by their `index`; finalization orders
/// the calls by that index.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    content: String,
    refusal: Option<String>,
    function_call: Value,
    tool_calls: BTreeMap<u32, PendingToolCall>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the buffer. `role` and `sender` are ignored.
    pub fn push(&mut self, delta: MessageDelta) {
        let MessageDelta {
            content,
            refusal,
            function_call,
            tool_calls,
            ..
        } = delta;

        if let Some(text) = content {
            self.content.push_str(&text);
        }
        if let Some(text) = refusal {
            self.refusal.get_or_insert_with(String::new).push_str(&text);
        }
        if let Some(value) = function_call {
            merge_fields(&mut self.function_call, value);
        }
        for call in tool_calls.into_iter().flatten() {
            self.push_tool_call(call);
        }
    }

    fn push_tool_call(&mut self, delta: ToolCallDelta) {
        if !self.tool_calls.contains_key(&delta.index) {
            let expected = self
                .tool_calls
                .keys()
                .next_back()
                .map_or(0, |last| last + 1);
            if delta.index != expected {
                warn!(
                    index = delta.index,
                    expected, "Tool call fragment arrived out of order"
                );
            }
        }

        let pending = self.tool_calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            pending.id.push_str(&id);
        }
        if let Some(kind) = delta.kind {
            pending.kind = kind;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                pending.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                pending.arguments.push_str(&arguments);
            }
        }
    }

    /// Build the final assistant message, stamped with `sender`.
    pub fn finish(self, sender: &str) -> Message {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|pending| ToolCall {
                id: pending.id,
                kind: if pending.kind.is_empty() {
                    "function".into()
                } else {
                    pending.kind
                },
                function: FunctionCall {
                    name: pending.name,
                    arguments: pending.arguments,
                },
            })
            .collect();

        let mut message = Message::assistant(self.content)
            .with_sender(sender)
            .with_tool_calls(tool_calls);
        message.refusal = self.refusal;
        message.function_call = match self.function_call {
            Value::Null => None,
            value => Some(value),
        };
        message
    }
}

/// Merge `source` into `target`: strings concatenate, objects merge key by
/// key, `null` is ignored, anything else replaces the target.
pub fn merge_fields(target: &mut Value, source: Value) {
    match (target, source) {
        (_, Value::Null) => {}
        (Value::String(existing), Value::String(text)) => existing.push_str(&text),
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                match existing.get_mut(&key) {
                    Some(slot) => merge_fields(slot, value),
                    None if value.is_null() => {}
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::message::Role;
    use handoff_core::provider::FunctionDelta;
    use serde_json::json;

    fn call_fragment(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> MessageDelta {
        MessageDelta {
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id: id.map(String::from),
                kind: id.map(|_| "function".to_string()),
                function: Some(FunctionDelta {
                    name: name.map(String::from),
                    arguments: Some(args.to_string()),
                }),
            }]),
            ..MessageDelta::default()
        }
    }

    #[test]
    fn content_fragments_concatenate() {
        let mut buffer = MessageBuffer::new();
        buffer.push(MessageDelta::content("a"));
        buffer.push(MessageDelta::content("b"));
        let message = buffer.finish("Agent");
        assert_eq!(message.content.as_deref(), Some("ab"));
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.sender.as_deref(), Some("Agent"));
    }

    #[test]
    fn single_fragment_is_unchanged() {
        let mut buffer = MessageBuffer::new();
        buffer.push(MessageDelta::content("a"));
        assert_eq!(buffer.finish("Agent").content.as_deref(), Some("a"));
    }

    #[test]
    fn empty_buffer_has_empty_content_and_no_calls() {
        let message = MessageBuffer::new().finish("Agent");
        assert_eq!(message.content.as_deref(), Some(""));
        assert!(message.tool_calls.is_none());
        assert!(message.function_call.is_none());
        assert!(message.refusal.is_none());
    }

    #[test]
    fn role_and_sender_are_not_merged() {
        let mut buffer = MessageBuffer::new();
        buffer.push(MessageDelta {
            role: Some(Role::Assistant),
            sender: Some("Someone".into()),
            content: Some("hi".into()),
            ..MessageDelta::default()
        });
        let message = buffer.finish("Triage");
        assert_eq!(message.sender.as_deref(), Some("Triage"));
        assert_eq!(message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn tool_call_fragments_assemble_by_index() {
        let mut buffer = MessageBuffer::new();
        buffer.push(call_fragment(0, Some("call_"), Some("get_"), ""));
        buffer.push(call_fragment(0, Some("a"), Some("weather"), "{\"city\""));
        buffer.push(call_fragment(1, Some("call_b"), Some("lookup"), "{}"));
        buffer.push(call_fragment(0, None, None, ":\"Oslo\"}"));

        let calls = buffer.finish("Agent").tool_calls.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name(), "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"Oslo\"}");
        assert_eq!(calls[0].kind, "function");
        assert_eq!(calls[1].id, "call_b");
    }

    #[test]
    fn every_entry_of_a_fragment_is_merged() {
        let mut buffer = MessageBuffer::new();
        let mut first = call_fragment(0, Some("call_a"), Some("one"), "{}");
        let second = call_fragment(1, Some("call_b"), Some("two"), "{}");
        first
            .tool_calls
            .as_mut()
            .unwrap()
            .extend(second.tool_calls.unwrap());
        buffer.push(first);

        let calls = buffer.finish("Agent").tool_calls.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name(), "two");
    }

    #[test]
    fn out_of_order_indices_are_ordered_on_finish() {
        let mut buffer = MessageBuffer::new();
        buffer.push(call_fragment(2, Some("call_c"), Some("third"), "{}"));
        buffer.push(call_fragment(0, Some("call_a"), Some("first"), "{}"));

        let calls = buffer.finish("Agent").tool_calls.unwrap();
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].id, "call_c");
    }

    #[test]
    fn refusal_concatenates() {
        let mut buffer = MessageBuffer::new();
        for part in ["I can't ", "help with that."] {
            buffer.push(MessageDelta {
                refusal: Some(part.into()),
                ..MessageDelta::default()
            });
        }
        assert_eq!(
            buffer.finish("Agent").refusal.as_deref(),
            Some("I can't help with that.")
        );
    }

    #[test]
    fn function_call_merges_recursively() {
        let mut buffer = MessageBuffer::new();
        for fragment in [
            json!({"name": "lookup", "arguments": ""}),
            json!({"arguments": "{\"q\":"}),
            json!({"arguments": "1}", "name": null}),
        ] {
            buffer.push(MessageDelta {
                function_call: Some(fragment),
                ..MessageDelta::default()
            });
        }
        assert_eq!(
            buffer.finish("Agent").function_call,
            Some(json!({"name": "lookup", "arguments": "{\"q\":1}"}))
        );
    }

    #[test]
    fn merge_fields_rules() {
        let mut target = json!({"text": "a", "nested": {"n": "x"}, "count": 1});
        merge_fields(
            &mut target,
            json!({"text": "b", "nested": {"n": "y", "new": true}, "count": 2, "gone": null}),
        );
        assert_eq!(
            target,
            json!({"text": "ab", "nested": {"n": "xy", "new": true}, "count": 2})
        );
    }
}
