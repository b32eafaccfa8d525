//! CABM CLI: the main entry point.
//!
//! Commands:
//! - `chat`    send one message (or read lines from stdin) and stream the reply
//! - `serve`   start the HTTP gateway
//! - `config`  show, locate or initialise the configuration file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cabm",
    about = "CABM: streaming character chat with tool calls",
    version
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
    /// Chat with the character
    Chat {
        /// Send a single message instead of reading lines from stdin
        #[arg(short, long)]
        message: Option<String>,

        /// Let the model call tools this turn
        #[arg(short, long)]
        tools: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration (keys redacted)
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

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
        Commands::Chat { message, tools } => commands::chat::run(message, tools).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}
