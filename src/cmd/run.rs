//! `shipfill run`: fill and dispatch one shipment against a simulated cell.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::super::Cli;
use shipfill::reconcile::ConvergenceMode;

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    scenario_path: &Path,
    step: bool,
    convergence: Option<ConvergenceMode>,
) -> Result<()> {
    use shipfill::audit::{AuditLogger, RunConfig, RunOutcome};
    use shipfill::cell::{Cell, SessionStarter};
    use shipfill::config::ShipfillConfig;
    use shipfill::pipeline::{Sequencer, order_channel};
    use shipfill::reconcile::{ConsoleGate, EngineEvent};
    use shipfill::scenario::Scenario;

    let config =
        ShipfillConfig::with_cli_args(project_dir, cli.verbose, convergence, cli.log_format)?;
    let _guard = super::init_logging(&config)?;

    let scenario = Scenario::load(scenario_path)?;
    for warning in scenario.validate() {
        tracing::warn!("Scenario: {}", warning);
    }
    let (order, sim) = scenario.into_cell(config.tolerance());

    sim.start().await.context("Failed to start work session")?;

    let reconcile = config.reconcile_settings();
    let mut audit = AuditLogger::new(&config.audit_dir());
    audit.start_run(RunConfig {
        scenario: scenario_path.to_path_buf(),
        project_dir: config.project_dir.clone(),
        convergence: reconcile.convergence,
        actuation_retries: reconcile.actuation_retries,
        step,
        verbose: cli.verbose,
    })?;

    // The order arrives on its own task, like a subscription callback would deliver it.
    let (order_tx, order_feed) = order_channel();
    tokio::spawn(async move {
        if order_tx.send(order).is_err() {
            tracing::warn!("Order feed closed before the order was delivered");
        }
    });

    let order = match order_feed.wait(&config.order_policy()).await {
        Ok(order) => order,
        Err(e) => {
            let path = audit.finish_run(RunOutcome::from(&e))?;
            println!("Audit: {}", path.display());
            return Err(e.into());
        }
    };
    audit.record_order(&order)?;

    let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(64);
    let recorder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
            audit.add_event(event)?;
        }
        Ok::<_, anyhow::Error>(audit)
    });

    let mut sequencer = Sequencer::new(
        Cell::from_shared(sim.clone()),
        config.pipeline_settings(),
        reconcile,
    )
    .with_event_channel(event_tx);
    if step {
        sequencer = sequencer.with_gate(Arc::new(ConsoleGate::new()));
    }

    let result = sequencer.run(&order).await;
    drop(sequencer);
    let mut audit = recorder.await.context("Event recorder task failed")??;

    let outcome = match &result {
        Ok(outcome) => RunOutcome::from(outcome),
        Err(e) => RunOutcome::from(e),
    };
    let audit_path = audit.finish_run(outcome)?;

    println!();
    match result {
        Ok(outcome) => {
            println!(
                "{} Shipment {} dispatched",
                style("✓").green().bold(),
                style(&outcome.shipment_type).bold()
            );
            for station in &outcome.stations {
                let state = if station.fully_converged {
                    style("converged").green()
                } else {
                    style("corrections outstanding").yellow()
                };
                println!(
                    "  {}: {} inspections, {} corrections ({})",
                    station.station, station.inspections, station.corrections, state
                );
            }
            println!("  Dispatch attempts: {}", outcome.dispatch_attempts);
            let elapsed = format!("{:.2}s", outcome.elapsed.as_secs_f64());
            if outcome.over_budget {
                println!("  Elapsed: {} {}", elapsed, style("(over budget)").yellow());
            } else {
                println!("  Elapsed: {}", elapsed);
            }
            let report = sim.report().await;
            println!("  Discarded: {}", report.discarded.len());
            println!("Audit: {}", audit_path.display());
            Ok(())
        }
        Err(e) => {
            println!(
                "{} Run failed while {}",
                style("✗").red().bold(),
                e.phase()
            );
            println!("Audit: {}", audit_path.display());
            Err(e.into())
        }
    }
}

fn print_event(event: &shipfill::reconcile::EngineEvent) {
    use shipfill::reconcile::EngineEvent;

    match event {
        EngineEvent::Inspected { station, summary } => {
            println!("{} {}", style(format!("[{}]", station)).cyan(), summary);
        }
        EngineEvent::Correcting {
            station,
            correction,
        } => {
            println!(
                "{} {} {}",
                style(format!("[{}]", station)).cyan(),
                style("→").dim(),
                correction
            );
        }
        EngineEvent::Converged {
            station,
            fully_converged,
            ..
        } => {
            let label = if *fully_converged {
                style("done").green()
            } else {
                style("done (staged)").yellow()
            };
            println!("{} {}", style(format!("[{}]", station)).cyan(), label);
        }
        EngineEvent::Failed { station, error } => {
            println!(
                "{} {}",
                style(format!("[{}]", station)).cyan(),
                style(error).red()
            );
        }
    }
}
