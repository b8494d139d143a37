//! Run results and streaming events.

use std::sync::Arc;

use crate::agent::Agent;
use crate::context::ContextVariables;
use crate::message::Message;
use crate::provider::MessageDelta;

/// The outcome of a complete run.
#[derive(Debug, Clone)]
pub struct Response {
    /// Messages produced during the run (the caller's input is not repeated)
    pub messages: Vec<Message>,

    /// The agent active when the run ended
    pub agent: Arc<Agent>,

    /// Context variables after every update of the run
    pub context_variables: ContextVariables,
}

impl Response {
    /// Content of the last message produced, if any.
    pub fn last_text(&self) -> Option<&str> {
        self.messages.last().and_then(|m| m.content.as_deref())
    }
}

/// The outcome of one batch of tool calls.
#[derive(Debug, Clone, Default)]
pub struct PartialResponse {
    /// One tool message per tool call, in call order
    pub messages: Vec<Message>,

    /// Hand-off target, if any call in the batch named one (last wins)
    pub agent: Option<Arc<Agent>>,

    /// Context updates produced by the batch (later calls win)
    pub context_variables: ContextVariables,
}

/// Marks the boundaries of one streamed assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Start,
    End,
}

/// Events produced by a streaming run, in order.
///
/// - `delim`: a streamed turn begins or ends
/// - `delta`: partial assistant output
/// - `partial_response`: the tool messages of one turn
/// - `response`: the final result, always the last event
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delim(Delimiter),
    Delta(MessageDelta),
    PartialResponse(PartialResponse),
    Response(Response),
}

impl StreamEvent {
    /// Short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delim(_) => "delim",
            Self::Delta(_) => "delta",
            Self::PartialResponse(_) => "partial_response",
            Self::Response(_) => "response",
        }
    }
}
