use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::{PipelineError, RunPhase};
use crate::model::Order;
use crate::pipeline::ShipmentOutcome;
use crate::reconcile::{ConvergenceMode, EngineEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub order: Option<Order>,
    pub events: Vec<TimedEvent>,
    pub outcome: RunOutcome,
}

impl AuditRun {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            order: None,
            events: Vec::new(),
            outcome: RunOutcome::InProgress,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.ended_at = Some(Utc::now());
        self.outcome = outcome;
    }

    /// Corrections issued across both stations.
    pub fn corrections(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.event, EngineEvent::Correcting { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub scenario: PathBuf,
    pub project_dir: PathBuf,
    pub convergence: ConvergenceMode,
    pub actuation_retries: u32,
    pub step: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    pub event: EngineEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    InProgress,
    Dispatched {
        shipment_type: String,
        dispatch_attempts: u32,
        /// Both stations ended on an entirely clean observation.
        fully_converged: bool,
        elapsed_secs: f64,
        over_budget: bool,
    },
    Failed {
        phase: RunPhase,
        message: String,
    },
}

impl From<&ShipmentOutcome> for RunOutcome {
    fn from(outcome: &ShipmentOutcome) -> Self {
        RunOutcome::Dispatched {
            shipment_type: outcome.shipment_type.clone(),
            dispatch_attempts: outcome.dispatch_attempts,
            fully_converged: outcome.stations.iter().all(|s| s.fully_converged),
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            over_budget: outcome.over_budget,
        }
    }
}

impl From<&PipelineError> for RunOutcome {
    fn from(err: &PipelineError) -> Self {
        RunOutcome::Failed {
            phase: err.phase(),
            message: err.to_string(),
        }
    }
}

pub mod logger;
pub use logger::AuditLogger;
