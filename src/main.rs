use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use pulse::config::PulseConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(version, about = "Live project sync client")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// REST API base URL. Overrides config file and PULSE_BASE_URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// WebSocket base URL. Overrides config file and PULSE_WS_URL.
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Path to a pulse.toml config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show phase progress for a project
    Status {
        /// Project id
        project: i64,
    },
    /// Follow a project's progress live over the realtime channel
    Watch {
        /// Project id
        project: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info,pulse=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = PulseConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        config.remote.base_url = base_url.clone();
    }
    if let Some(ws_url) = &cli.ws_url {
        config.remote.ws_url = ws_url.clone();
    }

    match &cli.command {
        Commands::Status { project } => {
            cmd::cmd_status(&config.remote.base_url, *project).await?;
        }
        Commands::Watch { project } => {
            cmd::cmd_watch(&config, *project).await?;
        }
    }

    Ok(())
}
