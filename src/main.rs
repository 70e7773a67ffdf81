use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use dmbot::commands;
use dmbot::config::SettingsArgs;

#[derive(Parser, Debug)]
#[command(
    name = "dmbot",
    version,
    about = "Auto-respond to Instagram direct messages",
    long_about = "Polls an Instagram inbox, approves follow requests and answers new direct messages with club information or a language model reply"
)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append log output to this file
    #[arg(long, env = "DMBOT_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the start/stop/status control API
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "DMBOT_LISTEN", default_value = "127.0.0.1:5000")]
        listen: SocketAddr,

        /// Start the bot as soon as the server is up
        #[arg(long)]
        autostart: bool,
    },

    /// Run the bot in the foreground until Ctrl+C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let args = Cli::parse();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let file_layer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path}", path = path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    if args.verbose {
        debug!("Verbose mode enabled");
    }

    let config = args.settings.into_config()?;

    match args.command {
        Commands::Serve { listen, autostart } => {
            commands::serve::execute(config, listen, autostart).await?
        }
        Commands::Run => commands::run::execute(config).await?,
    }

    Ok(())
}
