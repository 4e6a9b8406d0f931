//! CLI entry and dispatch.

use anyhow::Result;
use clap::Parser;
use tether_core::config::Config;
use tracing_subscriber::EnvFilter;

use crate::modes;

#[derive(Parser)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Streaming client for agent-execution services")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the service base URL from config
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Session lifecycle operations
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Send a message and stream the reply (creates a session first)
    Send {
        /// Message text
        text: String,

        /// Reuse an existing session instead of creating one
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// Attach to the legacy subscription stream for a session
    Watch {
        /// Session id to subscribe to
        session_id: String,
    },
}

#[derive(clap::Subcommand)]
enum SessionCommands {
    /// Create an empty session and print its id
    Create,
}

pub fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Session {
                command: SessionCommands::Create,
            } => modes::session_create(&config).await,
            Commands::Send { text, session } => modes::send(&config, &text, session).await,
            Commands::Watch { session_id } => modes::watch(&config, &session_id).await,
        }
    })
}

/// Logs go to stderr so streamed output owns stdout.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("TETHER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("tether=info,tether_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
