//! # reconstream
//!
//! Command-line entry point for the Reconstream server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reconstream_core::error::format_error_with_suggestion;
use reconstream_core::Config;

mod commands;

/// Reconstream - streaming multi-view 3D reconstruction server
#[derive(Parser)]
#[command(name = "reconstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file, merged over the user and working-directory files
    #[arg(short, long, global = true, value_name = "PATH", env = "RECONSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve(ServeArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum number of live sessions
    #[arg(long)]
    max_sessions: Option<usize>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration and report issues
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Config { action }) => {
            commands::config::handle(action, cli.config.as_deref())?;
        }
        Some(Commands::Version) => {
            println!("reconstream {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve(args)) => serve(args, cli.config).await?,
        None => serve(ServeArgs::default(), cli.config).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max_sessions) = args.max_sessions {
        config.sessions.max_sessions = max_sessions;
    }

    let config = config
        .into_validated()
        .map_err(|e| anyhow::anyhow!(format_error_with_suggestion(&e)))?;

    commands::serve::run(config).await
}
