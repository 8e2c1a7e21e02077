use super::{AuditRun, RunConfig, RunOutcome, TimedEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Order;
use crate::reconcile::EngineEvent;

pub struct AuditLogger {
    audit_dir: PathBuf,
    current_run: Option<AuditRun>,
    current_run_file: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        let current_run_file = audit_dir.join("current-run.json");
        Self {
            audit_dir: audit_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, config: RunConfig) -> Result<()> {
        fs::create_dir_all(self.audit_dir.join("runs"))
            .context("Failed to create audit runs directory")?;
        self.current_run = Some(AuditRun::new(config));
        self.save_current()
    }

    pub fn record_order(&mut self, order: &Order) -> Result<()> {
        let run = self.active_run("record_order")?;
        run.order = Some(order.clone());
        self.save_current()
    }

    /// Append an engine event to the current run.
    ///
    /// Returns an error if no run is active, so events are never silently
    /// dropped.
    pub fn add_event(&mut self, event: EngineEvent) -> Result<()> {
        let run = self.active_run("add_event")?;
        run.events.push(TimedEvent {
            at: Utc::now(),
            event,
        });
        self.save_current()
    }

    pub fn finish_run(&mut self, outcome: RunOutcome) -> Result<PathBuf> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;

        run.finish(outcome);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let run_file = self.audit_dir.join("runs").join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize audit run")?;
        fs::write(&run_file, json).context("Failed to write audit run file")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        self.current_run = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current_run {
            let json =
                serde_json::to_string_pretty(&run).context("Failed to serialize current run")?;
            fs::write(&self.current_run_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }

    pub fn current_run(&self) -> Option<&AuditRun> {
        self.current_run.as_ref()
    }

    /// Finished runs, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.audit_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<AuditRun> {
        let content = fs::read_to_string(path).context("Failed to read audit run file")?;
        serde_json::from_str(&content).context("Failed to parse audit run file")
    }

    fn active_run(&mut self, caller: &str) -> Result<&mut AuditRun> {
        self.current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("{} called with no active run", caller))
    }
}
