//! `handoff chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use handoff_agent::{Orchestrator, RetryPolicy, RetryState, RunOptions};
use handoff_config::HandoffConfig;
use handoff_core::{
    Agent, ContextVariables, Delimiter, FunctionTool, Instructions, Message, Response, Role,
    StreamEvent, ToolOutput, ToolResult,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Command-line options of `handoff chat`.
pub struct ChatArgs {
    pub message: Option<String>,
    pub stream: bool,
    pub max_turns: Option<usize>,
    pub context: Vec<String>,
}

pub async fn run(args: ChatArgs) -> CliResult<()> {
    let config = HandoffConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && handoff_providers::requires_api_key(&config.provider) {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    HANDOFF_API_KEY=sk-...   (generic)");
        eprintln!("    OPENAI_API_KEY=sk-...    (for OpenAI direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", HandoffConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = handoff_providers::build_provider(&config)?;

    let orchestrator = Orchestrator::new(provider)
        .with_retry_policy(RetryPolicy::from(&config.retry))
        .with_retry_observer(report_retry);

    let mut options = RunOptions::from_config(&config.run);
    options.stream |= args.stream;
    if args.max_turns.is_some() {
        options.max_turns = args.max_turns;
    }

    let mut context_variables = parse_context(&args.context)?;
    let mut agent = Arc::new(build_agent(&config));

    tracing::debug!(
        provider = %config.provider,
        model = %config.agent_model(),
        stream = options.stream,
        "Chat session configured"
    );

    if let Some(message) = args.message {
        // Single message mode
        let history = vec![Message::user(message)];
        let options = options.with_context_variables(context_variables);
        run_once(&orchestrator, agent, &history, options).await?;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Handoff: interactive chat");
    println!();
    println!("  Provider:  {}", config.provider);
    println!("  Model:     {}", config.agent_model());
    println!("  Agent:     {}", agent.name);
    println!("  Streaming: {}", if options.stream { "on" } else { "off" });
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if matches!(input, "exit" | "quit") {
            break;
        }
        if input.is_empty() {
            prompt()?;
            continue;
        }

        history.push(Message::user(input));
        let run_options = options
            .clone()
            .with_context_variables(context_variables.clone());

        match run_once(&orchestrator, agent.clone(), &history, run_options).await {
            Ok(response) => {
                history.extend(response.messages);
                agent = response.agent;
                context_variables = response.context_variables;
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                // Forget the message that failed so the history stays valid
                history.pop();
            }
        }

        println!();
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn prompt() -> CliResult<()> {
    print!("  You > ");
    std::io::stdout().flush()?;
    Ok(())
}

fn report_retry(state: &RetryState) {
    if state.sleep_time.is_zero() {
        eprintln!("  [retry] attempt {} failed: {}", state.tries + 1, state.error);
    } else {
        eprintln!(
            "  [retry] attempt {} failed: {} (retrying in {}s)",
            state.tries + 1,
            state.error,
            state.sleep_time.as_secs()
        );
    }
}

/// Run one user input and print what happens.
async fn run_once(
    orchestrator: &Orchestrator,
    agent: Arc<Agent>,
    history: &[Message],
    options: RunOptions,
) -> CliResult<Response> {
    if !options.stream {
        let from = agent.name.clone();
        let response = orchestrator.run(agent, history, options).await?;
        print_messages(&response.messages);
        if response.agent.name != from {
            println!("  [handoff] {from} -> {}", response.agent.name);
        }
        return Ok(response);
    }

    let mut events = orchestrator.run_and_stream(agent, history, options);
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Delim(Delimiter::Start) => {}
            StreamEvent::Delim(Delimiter::End) => println!(),
            StreamEvent::Delta(delta) => {
                if let Some(sender) = &delta.sender {
                    print!("  {sender} > ");
                }
                if let Some(content) = &delta.content {
                    print!("{content}");
                }
                stdout.flush()?;
            }
            StreamEvent::PartialResponse(partial) => {
                for message in &partial.messages {
                    print_tool_message(message);
                }
                if let Some(next) = &partial.agent {
                    println!("  [handoff] -> {}", next.name);
                }
            }
            StreamEvent::Response(response) => return Ok(response),
        }
    }

    Err("Run ended without a response".into())
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        match message.role {
            Role::Assistant => {
                let sender = message.sender.as_deref().unwrap_or("Assistant");
                for line in message.text().lines() {
                    println!("  {sender} > {line}");
                }
                for call in message.tool_calls.iter().flatten() {
                    println!("  {sender} > {}({})", call.name(), call.function.arguments);
                }
            }
            Role::Tool => print_tool_message(message),
            Role::System | Role::User => {}
        }
    }
}

fn print_tool_message(message: &Message) {
    let name = message.tool_name.as_deref().unwrap_or("tool");
    println!("  [tool] {name} -> {}", message.text());
}

/// The agent described by the `[agent]` config section.
fn build_agent(config: &HandoffConfig) -> Agent {
    let section = &config.agent;
    let template = section.instructions.clone();

    let agent = Agent::new(&section.name)
        .with_model(config.agent_model())
        .with_instructions(Instructions::computed(move |ctx| {
            render_instructions(&template, ctx)
        }))
        .with_parallel_tool_calls(section.parallel_tool_calls)
        .with_function(remember_tool());

    match &section.tool_choice {
        Some(choice) => agent.with_tool_choice(choice),
        None => agent,
    }
}

/// Fill `{key}` placeholders from the context and list the remaining
/// variables after the template.
fn render_instructions(template: &str, context_variables: &ContextVariables) -> String {
    let mut text = template.to_string();
    let mut unused = Vec::new();

    for (key, _) in context_variables.iter() {
        let placeholder = format!("{{{key}}}");
        if text.contains(&placeholder) {
            text = text.replace(&placeholder, &context_variables.get_str(key));
        } else {
            unused.push(format!("- {key}: {}", context_variables.get_str(key)));
        }
    }

    if !unused.is_empty() {
        text.push_str("\n\nKnown context:\n");
        text.push_str(&unused.join("\n"));
    }
    text
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RememberArgs {
    /// Short name of the fact, such as "name" or "city"
    key: String,
    /// The fact itself
    value: String,
}

/// Lets the model store facts in the context variables.
fn remember_tool() -> FunctionTool {
    FunctionTool::typed(
        "remember",
        "Remember a fact about the user for the rest of the conversation.",
        |args: RememberArgs| async move {
            let reply = format!("Remembered {}.", args.key);
            let context = ContextVariables::new().with(args.key, args.value);
            Ok(ToolOutput::from(
                ToolResult::new(reply).with_context_variables(context),
            ))
        },
    )
}

/// Parse `KEY=VALUE` pairs. Values that are valid JSON keep their type.
fn parse_context(pairs: &[String]) -> Result<ContextVariables, String> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid context variable '{pair}', expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Invalid context variable '{pair}', empty key"));
            }
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}
