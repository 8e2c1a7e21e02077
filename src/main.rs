use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shipfill::config::LogFormat;
use shipfill::model::Station;
use shipfill::reconcile::ConvergenceMode;

mod cmd;

#[derive(Parser)]
#[command(name = "shipfill")]
#[command(version, about = "Fill, inspect and dispatch a shipment container")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format: pretty or json. Overrides shipfill.toml.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fill the scenario's order at Q1 and Q2, then dispatch it
    Run {
        /// Scenario file describing the order and the simulated cell
        #[arg(short, long)]
        scenario: PathBuf,

        /// Ask before every corrective action
        #[arg(long)]
        step: bool,

        /// When a station counts as done: staged or full
        #[arg(long)]
        convergence: Option<ConvergenceMode>,
    },
    /// Classify the container at one station without correcting anything
    Inspect {
        #[arg(short, long)]
        scenario: PathBuf,

        #[arg(long, default_value = "q1")]
        station: Station,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default shipfill.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            scenario,
            step,
            convergence,
        } => {
            cmd::cmd_run(&cli, project_dir, scenario, *step, *convergence).await?;
        }
        Commands::Inspect { scenario, station } => {
            cmd::cmd_inspect(&cli, project_dir, scenario, *station).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
