#![allow(dead_code)]

use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::sync::broadcast;

mod client;
mod config;
mod core;
mod logging;
mod proxy;

use client::{CommandHost, LogHost, ReloadListener};
use crate::core::{ControlMessage, EventManager};

/// Eavesdrop - Watch a project tree and rerun commands on change
#[derive(Parser)]
#[command(name = "eavesdrop")]
#[command(author = "Keith Bugeja <keith.bugeja@um.edu.mt>")]
#[command(version = "0.1.0")]
#[command(about = "Eavesdrop: A Live Reload Runner for Development Servers")]
#[command(long_about =
"--------------------------------------------------------------------------------
  ███████╗ █████╗ ██╗   ██╗███████╗███████╗██████╗ ██████╗  ██████╗ ██████╗
  ██╔════╝██╔══██╗██║   ██║██╔════╝██╔════╝██╔══██╗██╔══██╗██╔═══██╗██╔══██╗
  █████╗  ███████║██║   ██║█████╗  ███████╗██║  ██║██████╔╝██║   ██║██████╔╝
  ██╔══╝  ██╔══██║╚██╗ ██╔╝██╔══╝  ╚════██║██║  ██║██╔══██╗██║   ██║██╔═══╝
  ███████╗██║  ██║ ╚████╔╝ ███████╗███████║██████╔╝██║  ██║╚██████╔╝██║
  ╚══════╝╚═╝  ╚═╝  ╚═══╝  ╚══════╝╚══════╝╚═════╝ ╚═╝  ╚═╝ ╚═════╝ ╚═╝

    Watches a project tree, reruns tasks and restarts services
    when files change, and reloads connected browser pages.
--------------------------------------------------------------------------------")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = config::types::JSON_CONFIG)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a default configuration file
    Init {
        /// Directory the configuration file is written to
        #[arg(short, long, default_value = ".")]
        out: String,

        /// Configuration format (.json, .yaml or .toml)
        #[arg(short, long, default_value = ".json")]
        ext: String,
    },

    /// Reload on refresh events from a running proxy
    Listen {
        /// Base url of the proxy
        #[arg(short, long, default_value = "http://127.0.0.1:8001")]
        url: String,

        /// Shell command to run on each reload
        #[arg(short, long)]
        exec: Option<String>,

        /// Maximum run time of the reload command in milliseconds
        #[arg(short, long, default_value_t = 2000)]
        timeout: u64,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    logging::init_logging(&cli.log_level);

    let result = match cli.command {
        None => run(&cli.config).await,
        Some(Command::Init { out, ext }) => init(&out, &ext),
        Some(Command::Listen { url, exec, timeout }) => listen(&url, exec, timeout).await,
    };

    if let Err(e) = result {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = config::load_config(config_path)?;
    tracing::info!("configuration loaded from '{config_path}'");

    let mut manager = EventManager::new(config).await?;
    tracing::info!("watching {}", manager.root().display());

    let (control_tx, control_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutting down");
        let _ = control_tx.send(ControlMessage::Terminate);
    });

    manager.run(control_rx).await;
    manager.stop().await;
    Ok(())
}

fn init(out: &str, ext: &str) -> anyhow::Result<()> {
    let path = config::generate_config(out, ext)?;
    tracing::info!("generated {}", path.display());
    Ok(())
}

async fn listen(url: &str, exec: Option<String>, timeout: u64) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(timeout);

    tokio::select! {
        result = async {
            match exec {
                Some(command) => ReloadListener::new(CommandHost::new(command, timeout)).listen(url).await,
                None => ReloadListener::new(LogHost::new()).listen(url).await,
            }
        } => result,
        _ = shutdown_signal() => Ok(()),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
