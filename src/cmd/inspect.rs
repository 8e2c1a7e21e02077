use anyhow::{Context, Result, bail};
use console::style;
use std::path::{Path, PathBuf};

use super::super::Cli;
use shipfill::model::{Station, Stop};

/// Move the scenario's container to `station` and print how it compares to
/// the first shipment, without correcting anything.
pub async fn cmd_inspect(
    cli: &Cli,
    project_dir: PathBuf,
    scenario_path: &Path,
    station: Station,
) -> Result<()> {
    use shipfill::cell::{Cell, SessionStarter};
    use shipfill::config::ShipfillConfig;
    use shipfill::pipeline::transport_to;
    use shipfill::scenario::Scenario;

    let config = ShipfillConfig::with_cli_args(project_dir, cli.verbose, None, cli.log_format)?;
    let _guard = super::init_logging(&config)?;

    let scenario = Scenario::load(scenario_path)?;
    let (order, sim) = scenario.into_cell(config.tolerance());
    let Some(shipment) = order.first_shipment() else {
        bail!("Order {} has no shipments", order.order_id);
    };

    sim.start().await.context("Failed to start work session")?;
    let cell = Cell::from_shared(sim.clone());

    let pipeline = config.pipeline_settings();
    transport_to(&cell, Stop::from(station), &pipeline.arrival).await?;

    let Some(pose) = cell.pose_sensor.container_pose(station).await? else {
        bail!("No container detected at {}", station);
    };
    let manifest = cell.projector.project(shipment, station, &pose).await?;
    let observation = cell
        .oracle
        .inspect(&manifest, station)
        .await
        .with_context(|| format!("Inspection at {} failed", station))?;

    println!(
        "{} {} for {}",
        style(format!("[{}]", station)).cyan(),
        observation.summary(),
        style(&shipment.shipment_type).bold()
    );
    println!("  Container pose: {}", pose);

    for entry in &observation.satisfied {
        println!(
            "  {} slot {}: {}",
            style("ok").green(),
            entry.slot,
            entry.observed
        );
    }
    for entry in &observation.misplaced {
        println!(
            "  {} slot {}: {}",
            style("misplaced").yellow(),
            entry.slot,
            entry.observed
        );
    }
    for slot in &observation.missing {
        if let Some(wanted) = manifest.slot(*slot) {
            println!("  {} slot {}: {}", style("missing").yellow(), slot, wanted);
        }
    }
    for part in &observation.orphaned {
        println!("  {} {}", style("orphaned").red(), part);
    }
    if let Some(part) = &observation.defective {
        println!("  {} {}", style("defective").red().bold(), part);
    }

    let observed = sim.report().await.container.len();
    for violation in observation.check_partition(&manifest, observed) {
        tracing::warn!(%station, "Inconsistent observation: {}", violation);
    }

    if observation.is_converged() {
        println!("{} Container matches the manifest", style("✓").green().bold());
    }

    Ok(())
}
