//! mcp-relay: drive a language model through the tools of an MCP peer
//!
//! Spawns a tool-hosting peer script, exposes `POST /query`, and answers each
//! query by looping between the model and the peer's tools.

mod agent;
mod commands;
mod dispatch;
mod mcp;
mod server;
mod transcript;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use relay_core::Config;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mcp-relay")]
#[command(about = "MCP client that lets a language model call peer-provided tools", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to relay.toml (default: search cwd and parents, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Args, Default)]
struct PeerArgs {
    /// Peer script to spawn (.py or .js)
    #[arg(long, env = "MCP_RELAY_PEER")]
    peer: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP front door (default)
    Serve {
        #[command(flatten)]
        peer: PeerArgs,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long, env = "MCP_RELAY_PORT")]
        port: Option<u16>,
    },

    /// One-shot query; prints the transcript as JSON
    Ask {
        #[command(flatten)]
        peer: PeerArgs,

        /// The query to send
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Connect to the peer and list its tools
    Tools {
        #[command(flatten)]
        peer: PeerArgs,
    },

    /// Print a saved transcript
    Show {
        /// Transcript file written by serve or ask
        path: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn apply_peer(config: &mut Config, args: PeerArgs) {
    if let Some(peer) = args.peer {
        config.peer.script = Some(peer);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Some(Commands::Serve { peer, host, port }) => {
            apply_peer(&mut config, peer);
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve(config).await
        }
        Some(Commands::Ask { peer, query }) => {
            apply_peer(&mut config, peer);
            commands::ask(config, &query.join(" ")).await
        }
        Some(Commands::Tools { peer }) => {
            apply_peer(&mut config, peer);
            commands::tools(config).await
        }
        Some(Commands::Show { path }) => commands::show(&path).await,
        None => {
            // Bare invocation still honours MCP_RELAY_PEER / MCP_RELAY_PORT
            if let Ok(peer) = std::env::var("MCP_RELAY_PEER") {
                config.peer.script = Some(PathBuf::from(peer));
            }
            if let Some(port) = std::env::var("MCP_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
            {
                config.server.port = port;
            }
            commands::serve(config).await
        }
    }
}
