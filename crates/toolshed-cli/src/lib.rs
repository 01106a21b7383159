//! toolshed CLI - Command-line host for the toolshed engine
//!
//! Wires configuration, logging and the engine components together behind
//! a handful of subcommands.
//!
//! # Usage
//!
//! ```bash
//! # Run a tool and record how long it runs
//! toolshed launch FastQC -- ./fastqc
//!
//! # Cumulative runtime per tool
//! toolshed usage
//!
//! # Preview, then delete, tools and the environments only they use
//! toolshed plan BWA HISAT2
//! toolshed remove BWA HISAT2
//!
//! # Enable debug logging
//! RUST_LOG=toolshed_engine=debug toolshed usage
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use toolshed_core::ToolName;

pub mod commands;
pub mod config;
pub mod format;
pub mod launch;
pub mod shed;

use config::Config;
use launch::LaunchOptions;
use shed::Shed;

/// Crates whose logs are shown by default.
const LOG_TARGETS: &[&str] = &[
    "toolshed",
    "toolshed_cli",
    "toolshed_engine",
    "toolshed_store",
];

// ============================================================================
// CLI Arguments
// ============================================================================

/// toolshed - usage tracking and dependency-aware cleanup of installed tools
#[derive(Parser, Debug)]
#[command(name = "toolshed", version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: <config dir>/toolshed/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a tool and track its runtime until it exits
    Launch {
        #[arg(value_parser = tool_name)]
        tool: ToolName,

        /// Track the newest process whose name contains NAME instead of the
        /// launched one (for wrapper scripts)
        #[arg(long, value_name = "NAME")]
        attach: Option<String>,

        /// Program and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show cumulative runtime per tool
    Usage {
        #[arg(value_parser = tool_name)]
        tool: Option<ToolName>,

        #[arg(long)]
        json: bool,
    },

    /// Show shared environment dependencies
    Deps {
        #[arg(value_parser = tool_name)]
        tool: Option<ToolName>,

        /// Write the default dependency table if none exists
        #[arg(long)]
        init: bool,
    },

    /// Show disk usage of tools and environments
    Storage {
        /// Fail unless this many bytes are free on the install volume
        #[arg(long, value_name = "BYTES")]
        require: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Preview deleting tools and the environments only they use
    Plan {
        #[arg(value_parser = tool_name, required = true)]
        tools: Vec<ToolName>,

        #[arg(long)]
        json: bool,
    },

    /// Delete tools and the environments only they use
    Remove {
        #[arg(value_parser = tool_name, required = true)]
        tools: Vec<ToolName>,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Clear recorded runtime
    ResetUsage {
        #[arg(value_parser = tool_name)]
        tool: Option<ToolName>,

        /// Reset every tool
        #[arg(long)]
        all: bool,
    },
}

fn tool_name(value: &str) -> Result<ToolName, String> {
    ToolName::parse(value).map_err(|e| e.to_string())
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parses arguments and runs the selected command.
pub async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = Config::load(args.config.as_deref())?;
    info!(
        data_dir = %config.data_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
        "toolshed starting"
    );
    let shed = Shed::open(config);

    match args.command {
        Command::Launch {
            tool,
            attach,
            command,
        } => {
            let cancel = CancellationToken::new();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = wait_for_shutdown_signal().await {
                    error!(error = %e, "Error waiting for shutdown signal");
                    return;
                }
                shutdown.cancel();
            });

            let options = LaunchOptions {
                tool,
                command,
                attach,
            };
            launch::launch(&shed, options, cancel).await
        }
        Command::Usage { tool, json } => commands::usage(&shed, tool.as_ref(), json),
        Command::Deps { tool, init } => commands::deps(&shed, tool.as_ref(), init),
        Command::Storage { require, json } => commands::storage(&shed, require, json),
        Command::Plan { tools, json } => commands::plan(&shed, &tools, json),
        Command::Remove { tools, yes } => commands::remove(&shed, &tools, yes).await,
        Command::ResetUsage { tool, all } => commands::reset_usage(&shed, tool.as_ref(), all),
    }
}

/// Logs go to stderr. `RUST_LOG` wins over the defaults.
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else {
        let level = if verbose { "debug" } else { "info" };
        let mut filter = EnvFilter::new("warn");
        for target in LOG_TARGETS {
            filter = filter.add_directive(format!("{target}={level}").parse()?);
        }
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
    }

    Ok(())
}
