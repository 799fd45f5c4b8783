use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use uppe_sentinel::Orchestrator;
use uppe_sentinel::config::Config;

#[derive(Parser)]
#[command(name = "uppe-sentinel")]
#[command(about = "Uppe monitoring and incident engine")]
#[command(version)]
struct Cli {
    /// Path to config file (defaults to $XDG_CONFIG_HOME/uppe/sentinel.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring loop until Ctrl-C
    Run,

    /// Probe every enabled resource once and print the tick report
    Once,

    /// Availability statistics for a resource
    Stats {
        resource_id: Uuid,

        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// SLA compliance for a resource
    Sla {
        resource_id: Uuid,

        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Bucketed check history for a resource
    History {
        resource_id: Uuid,

        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Print the effective configuration
    Config,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    logger::init_from(&config.logging.level, logger::LogFormat::parse(&config.logging.format));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting uppe-sentinel v{}", env!("CARGO_PKG_VERSION"));
            Orchestrator::start(config).await?;
        }
        Commands::Once => {
            let orchestrator = Orchestrator::open(config).await?;
            print_json(&orchestrator.run_once().await?)?;
        }
        Commands::Stats { resource_id, hours } => {
            let orchestrator = Orchestrator::open(config).await?;
            print_json(&orchestrator.get_resource_stats(resource_id, hours).await?)?;
        }
        Commands::Sla { resource_id, days } => {
            let orchestrator = Orchestrator::open(config).await?;
            print_json(&orchestrator.get_sla_report(resource_id, days).await?)?;
        }
        Commands::History { resource_id, hours } => {
            let orchestrator = Orchestrator::open(config).await?;
            print_json(&orchestrator.get_resource_history(resource_id, hours).await?)?;
        }
        Commands::Config => println!("{config}"),
    }

    Ok(())
}
