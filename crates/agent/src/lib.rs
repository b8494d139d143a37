//! The Handoff run loop.
//!
//! An [`Orchestrator`] drives one conversation through a sequence of
//! assistant turns:
//!
//! 1. **Ask** the active agent's model for the next message
//! 2. **Merge** streamed fragments into that message, if streaming
//! 3. **Dispatch** its tool calls and fold the results into the history
//! 4. **Hand off** to another agent when a tool returns one
//!
//! The loop ends when a turn asks for no tools, when tool execution is
//! disabled, or when the turn limit is reached. Transport failures are
//! retried according to a [`RetryPolicy`].

pub mod dispatch;
pub mod merge;
pub mod orchestrator;
pub mod retry;

pub use dispatch::handle_tool_calls;
pub use merge::MessageBuffer;
pub use orchestrator::{EventSink, Orchestrator, RunOptions, RunStream};
pub use retry::{RetryObserver, RetryPolicy, RetryState};
