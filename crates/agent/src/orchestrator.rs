//! The run loop: ask the model, execute its tool calls, follow hand-offs.
//!
//! Each iteration:
//!
//! 1. **Build the request** from the active agent (system prompt rendered
//!    against the context variables, tool definitions, model)
//! 2. **Call the provider**, either complete or streamed and merged
//! 3. **Stop** if the turn has no tool calls or tools are disabled
//! 4. **Dispatch** the tool calls, fold in context updates, switch agent
//!
//! [`Orchestrator::run`] returns the final [`Response`];
//! [`Orchestrator::run_and_stream`] yields [`StreamEvent`]s as they happen.
//! Both drive the same loop. A streaming run only advances while its
//! consumer polls for the next event.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use handoff_config::RunSection;
use handoff_core::agent::Agent;
use handoff_core::context::ContextVariables;
use handoff_core::error::{Error, ProviderError, Result};
use handoff_core::message::{Message, Role};
use handoff_core::provider::{CompletionRequest, Provider};
use handoff_core::response::{Delimiter, Response, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::dispatch;
use crate::merge::MessageBuffer;
use crate::retry::{RetryObserver, RetryPolicy, RetryState};

/// Events a streaming run may produce ahead of its consumer.
const EVENT_BUFFER: usize = 1;

/// Events of a streaming run. Ends with one `StreamEvent::Response`, or with
/// a single `Err` if the run fails.
pub type RunStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Initial context variables; copied, never mutated
    pub context_variables: ContextVariables,

    /// Use this model instead of each agent's own
    pub model_override: Option<String>,

    /// Request streamed completions
    pub stream: bool,

    /// Maximum number of assistant turns; unbounded when `None`
    pub max_turns: Option<usize>,

    /// When false the first turn is final and its tool calls are not run
    pub execute_tools: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            context_variables: ContextVariables::new(),
            model_override: None,
            stream: false,
            max_turns: None,
            execute_tools: true,
        }
    }
}

impl RunOptions {
    /// Options taken from the `[run]` config section.
    pub fn from_config(run: &RunSection) -> Self {
        Self {
            stream: run.stream,
            max_turns: run.max_turns,
            execute_tools: run.execute_tools,
            ..Self::default()
        }
    }

    pub fn with_context_variables(mut self, context_variables: ContextVariables) -> Self {
        self.context_variables = context_variables;
        self
    }

    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_execute_tools(mut self, execute_tools: bool) -> Self {
        self.execute_tools = execute_tools;
        self
    }
}

/// Receives the events of a run as they happen.
#[async_trait]
pub trait EventSink: Send {
    /// Deliver one event. Returns `false` once nobody is listening.
    async fn emit(&mut self, event: StreamEvent) -> bool;
}

/// Drops every event; used by blocking runs.
struct DiscardSink;

#[async_trait]
impl EventSink for DiscardSink {
    async fn emit(&mut self, _event: StreamEvent) -> bool {
        true
    }
}

/// Hands events to the [`RunStream`] that polls the run.
struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&mut self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// What the run produced since the stream last polled it.
enum Progress {
    Event(StreamEvent),
    Finished(Result<Response>),
}

async fn emit(sink: &mut dyn EventSink, event: StreamEvent) -> Result<()> {
    if sink.emit(event).await {
        Ok(())
    } else {
        Err(Error::Internal("run stream closed by consumer".into()))
    }
}

/// Runs agents against a provider.
///
/// Cheap to clone; clones share the provider and retry observer.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    retry_policy: RetryPolicy,
    retry_observer: Option<RetryObserver>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry_policy: RetryPolicy::default(),
            retry_observer: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Called once per failed provider attempt.
    pub fn with_retry_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryState) + Send + Sync + 'static,
    {
        self.retry_observer = Some(Arc::new(observer));
        self
    }

    /// Run to completion and return the final response.
    ///
    /// With `options.stream` set the provider is asked for a streamed
    /// completion; the events are discarded.
    pub async fn run(
        &self,
        agent: impl Into<Arc<Agent>>,
        messages: &[Message],
        options: RunOptions,
    ) -> Result<Response> {
        self.drive(agent.into(), messages, options, &mut DiscardSink)
            .await
    }

    /// Run to completion, delivering every event to `sink` along the way.
    ///
    /// Stops with an error as soon as the sink reports it is closed.
    pub async fn run_with_sink(
        &self,
        agent: impl Into<Arc<Agent>>,
        messages: &[Message],
        options: RunOptions,
        sink: &mut dyn EventSink,
    ) -> Result<Response> {
        self.drive(agent.into(), messages, options, sink).await
    }

    /// Prepare a streaming run and return its events.
    ///
    /// Completions are always streamed here, whatever `options.stream` says.
    /// Nothing happens until the stream is first polled, and the run never
    /// gets more than one event ahead of the consumer. Dropping the stream
    /// abandons the run where it stands.
    pub fn run_and_stream(
        &self,
        agent: impl Into<Arc<Agent>>,
        messages: &[Message],
        options: RunOptions,
    ) -> RunStream {
        let orchestrator = self.clone();
        let agent = agent.into();
        let messages = messages.to_vec();
        let options = RunOptions {
            stream: true,
            ..options
        };

        Box::pin(stream! {
            let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
            let mut sink = ChannelSink { tx };
            let run = orchestrator.drive(agent, &messages, options, &mut sink);
            tokio::pin!(run);

            loop {
                let progress = tokio::select! {
                    biased;
                    Some(event) = rx.recv() => Progress::Event(event),
                    outcome = &mut run => Progress::Finished(outcome),
                };

                match progress {
                    Progress::Event(event) => yield Ok(event),
                    Progress::Finished(outcome) => {
                        while let Ok(event) = rx.try_recv() {
                            yield Ok(event);
                        }
                        yield outcome.map(StreamEvent::Response);
                        break;
                    }
                }
            }
        })
    }

    async fn drive(
        &self,
        agent: Arc<Agent>,
        messages: &[Message],
        options: RunOptions,
        sink: &mut dyn EventSink,
    ) -> Result<Response> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, agent = %agent.name);

        async move {
            let RunOptions {
                mut context_variables,
                model_override,
                stream,
                max_turns,
                execute_tools,
            } = options;

            let mut active = agent;
            let mut history = messages.to_vec();
            let init_len = history.len();
            let mut turns = 0usize;

            debug!(
                messages = init_len,
                stream,
                max_turns = ?max_turns,
                "Starting run"
            );

            while max_turns.is_none_or(|max| turns < max) {
                let request = build_request(
                    &active,
                    &history,
                    &context_variables,
                    model_override.as_deref(),
                    stream,
                )
                .await;

                let mut message = if stream {
                    self.stream_turn(&active, request, sink).await?
                } else {
                    self.complete_turn(request).await?
                };
                message.sender = Some(active.name.clone());
                turns += 1;

                let tool_calls = message.tool_calls.clone().unwrap_or_default();
                debug!(
                    turn = turns,
                    agent = %active.name,
                    tool_calls = tool_calls.len(),
                    "Received completion"
                );
                history.push(message);

                if tool_calls.is_empty() || !execute_tools {
                    debug!("Ending turn");
                    break;
                }

                let partial =
                    dispatch::handle_tool_calls(&tool_calls, &active.functions, &context_variables)
                        .await?;
                emit(sink, StreamEvent::PartialResponse(partial.clone())).await?;

                history.extend(partial.messages);
                context_variables.merge(&partial.context_variables);
                if let Some(next) = partial.agent {
                    info!(from = %active.name, to = %next.name, "Handing off");
                    active = next;
                }
            }

            debug!(turns, agent = %active.name, "Run finished");

            Ok(Response {
                messages: history.split_off(init_len),
                agent: active,
                context_variables,
            })
        }
        .instrument(span)
        .await
    }

    async fn complete_turn(&self, request: CompletionRequest) -> Result<Message> {
        let provider = &self.provider;
        let request = &request;

        let response = self
            .retry_policy
            .run(self.retry_observer.as_ref(), move || {
                provider.complete(request.clone())
            })
            .await?;

        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Completion usage"
            );
        }

        Ok(response.message)
    }

    /// Stream one turn, forwarding fragments to `sink` and merging them.
    ///
    /// Opening the stream and receiving its first item is the retried unit;
    /// an error after that ends the run.
    async fn stream_turn(
        &self,
        agent: &Agent,
        request: CompletionRequest,
        sink: &mut dyn EventSink,
    ) -> Result<Message> {
        let provider = &self.provider;
        let request = &request;

        let (mut rx, first) = self
            .retry_policy
            .run(self.retry_observer.as_ref(), move || async move {
                let mut rx = provider.stream(request.clone()).await?;
                let first = rx.recv().await.transpose()?;
                Ok::<_, ProviderError>((rx, first))
            })
            .await?;

        emit(sink, StreamEvent::Delim(Delimiter::Start)).await?;

        let mut buffer = MessageBuffer::new();
        let mut next = first;
        while let Some(mut delta) = next {
            if delta.role == Some(Role::Assistant) {
                delta.sender = Some(agent.name.clone());
            }
            emit(sink, StreamEvent::Delta(delta.clone())).await?;
            buffer.push(delta);

            next = match rx.recv().await {
                None => None,
                Some(Ok(delta)) => Some(delta),
                Some(Err(e)) => return Err(interrupted(e).into()),
            };
        }

        emit(sink, StreamEvent::Delim(Delimiter::End)).await?;

        Ok(buffer.finish(&agent.name))
    }
}

fn interrupted(error: ProviderError) -> ProviderError {
    match error {
        ProviderError::StreamInterrupted(_) => error,
        other => ProviderError::StreamInterrupted(other.to_string()),
    }
}

/// Assemble the completion request for the active agent.
async fn build_request(
    agent: &Agent,
    history: &[Message],
    context_variables: &ContextVariables,
    model_override: Option<&str>,
    stream: bool,
) -> CompletionRequest {
    let instructions = agent.instructions.render(context_variables).await;

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(instructions));
    messages.extend(history.iter().map(Message::for_model));

    let tools = agent.tool_definitions();
    let has_tools = !tools.is_empty();

    CompletionRequest {
        model: model_override.map_or_else(|| agent.model.clone(), str::to_string),
        messages,
        tools: has_tools.then_some(tools),
        tool_choice: agent.tool_choice.clone(),
        parallel_tool_calls: has_tools.then_some(agent.parallel_tool_calls),
        stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::agent::Instructions;
    use handoff_core::tool::{FunctionTool, ToolArgs, ToolOutput};
    use serde_json::json;

    fn lookup_tool() -> FunctionTool {
        FunctionTool::new(
            "lookup",
            "Look something up",
            json!({
                "type": "object",
                "properties": {"q": {"type": "string"}, "context_variables": {"type": "object"}},
                "required": ["q", "context_variables"]
            }),
            |_args: ToolArgs| async move { Ok(ToolOutput::from("found")) },
        )
        .with_context()
    }

    #[tokio::test]
    async fn request_renders_instructions_and_strips_bookkeeping() {
        let agent = Agent::new("Helper").with_instructions(Instructions::computed(|ctx| {
            format!("Help {}.", ctx.get_str("user"))
        }));
        let history = vec![
            Message::user("hi"),
            Message::assistant("hello").with_sender("Helper"),
            Message::tool_result("c1", "lookup", "found"),
        ];
        let ctx = ContextVariables::new().with("user", "Ada");

        let request = build_request(&agent, &history, &ctx, None, false).await;

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].text(), "Help Ada.");
        assert!(request.messages.iter().all(|m| m.sender.is_none()));
        assert!(request.messages.iter().all(|m| m.tool_name.is_none()));
        assert_eq!(request.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(request.tools.is_none());
        assert!(request.parallel_tool_calls.is_none());
    }

    #[tokio::test]
    async fn request_with_tools_hides_context_parameter() {
        let agent = Agent::new("Helper")
            .with_function(lookup_tool())
            .with_tool_choice("auto")
            .with_parallel_tool_calls(false);

        let request = build_request(
            &agent,
            &[],
            &ContextVariables::new(),
            Some("gpt-4o-mini"),
            true,
        )
        .await;

        assert_eq!(request.model, "gpt-4o-mini");
        assert!(request.stream);
        assert_eq!(request.tool_choice.as_deref(), Some("auto"));
        assert_eq!(request.parallel_tool_calls, Some(false));
        let tools = request.tools.unwrap();
        assert_eq!(tools[0].name, "lookup");
        assert!(tools[0].parameters["properties"].get("context_variables").is_none());
        assert_eq!(tools[0].parameters["required"], json!(["q"]));
    }

    #[test]
    fn options_from_config() {
        let run = RunSection {
            max_turns: Some(3),
            execute_tools: false,
            stream: true,
        };
        let options = RunOptions::from_config(&run);
        assert_eq!(options.max_turns, Some(3));
        assert!(!options.execute_tools);
        assert!(options.stream);
        assert!(options.context_variables.is_empty());
    }

    #[test]
    fn interrupted_keeps_existing_variant() {
        let err = interrupted(ProviderError::StreamInterrupted("eof".into()));
        assert_eq!(err.to_string(), ProviderError::StreamInterrupted("eof".into()).to_string());
        let err = interrupted(ProviderError::Network("reset".into()));
        assert!(matches!(err, ProviderError::StreamInterrupted(ref m) if m.contains("reset")));
    }
}
