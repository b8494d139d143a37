//! Handoff CLI: the main entry point.
//!
//! Commands:
//! - `chat`: interactive or single-message chat with the configured agent
//! - `config`: show the active configuration, its path, or the defaults

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "handoff",
    about = "Handoff: multi-agent chat orchestrator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the configured agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Stream assistant output as it is generated
        #[arg(long)]
        stream: bool,

        /// Maximum assistant turns per message
        #[arg(long)]
        max_turns: Option<usize>,

        /// Initial context variable, as key=value (repeatable)
        #[arg(short, long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active configuration (API key omitted)
    Show,
    /// Print the configuration file path
    Path,
    /// Print a default configuration file
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            stream,
            max_turns,
            context,
        } => {
            let args = commands::chat::ChatArgs {
                message,
                stream,
                max_turns,
                context,
            };
            commands::chat::run(args).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Default => commands::config_cmd::print_default(),
        },
    }

    Ok(())
}
