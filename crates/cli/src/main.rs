//! Quill CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive session or single-message mode
//! - `onboard` — Initialize the config file
//! - `usage`   — Show known model pricing and the session directory

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "quill",
    about = "Quill — an interactive LLM agent for the terminal",
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
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Initialize configuration
    Onboard,

    /// Show model pricing and storage locations
    Usage,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat { message } => commands::chat::run(message).await?,
        Commands::Onboard => commands::onboard::run()?,
        Commands::Usage => commands::usage::run()?,
    }

    Ok(())
}
