//! `shipfill config`: view, validate and initialize configuration.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use shipfill::config::{CONFIG_DIR, CONFIG_FILE, ShipfillConfig, ShipfillToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Shipfill Configuration");
            println!("======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ShipfillToml::load(&config_path)?
            } else {
                println!("No shipfill.toml found at {}", config_path.display());
                println!("Using default configuration:");
                ShipfillToml::default()
            };
            println!();

            let p = &toml.pipeline;
            println!("[pipeline]");
            println!("  arrival_poll_ms = {}", p.arrival_poll_ms);
            println!("  arrival_max_polls = {}", bound(p.arrival_max_polls));
            println!("  dispatch_retry_ms = {}", p.dispatch_retry_ms);
            println!("  dispatch_max_attempts = {}", bound(p.dispatch_max_attempts));
            println!("  order_poll_ms = {}", p.order_poll_ms);
            println!("  order_max_polls = {}", bound(p.order_max_polls));
            println!("  time_budget_secs = {}", p.time_budget_secs);
            println!("  report_every = {}", p.report_every);
            println!();

            println!("[reconcile]");
            println!("  convergence = \"{}\"", toml.reconcile.convergence);
            println!("  actuation_retries = {}", toml.reconcile.actuation_retries);
            println!();

            println!("[inspection]");
            println!("  position = {}", toml.inspection.position);
            println!("  orientation = {}", toml.inspection.orientation);
            println!();

            println!("[logging]");
            println!("  format = \"{}\"", toml.logging.format);
            println!("  level = \"{}\"", toml.logging.level);
            if let Some(file) = &toml.logging.file {
                println!("  file = \"{}\"", file.display());
            }
            println!();

            if project_dir.exists() {
                println!("Effective values (with env/CLI overrides):");
                let config = ShipfillConfig::new(project_dir.to_path_buf())?;
                println!("  convergence = \"{}\"", config.convergence());
                println!("  log_format = \"{}\"", config.log_format());
                println!();
            }

            if !config_path.exists() {
                println!("Run 'shipfill config init' to create a shipfill.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No shipfill.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = ShipfillConfig::new(project_dir.to_path_buf())?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("shipfill.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create {}", config_dir.display()))?;
            ShipfillToml::default().save(&config_path)?;

            println!("Created shipfill.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [pipeline] poll intervals, bounds and the time budget");
            println!("  - [reconcile] convergence mode and actuation retries");
            println!("  - [logging] format, level and an optional log file");
            println!();
        }
    }

    Ok(())
}

fn bound(value: Option<u32>) -> String {
    value.map_or_else(|| "unbounded".to_string(), |v| v.to_string())
}
