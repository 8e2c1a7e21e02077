//! Typed error hierarchy for the shipment filler.
//!
//! Two top-level enums cover the two layers of the core:
//! - `ReconcileError`: fatal conditions inside one station's correction loop
//! - `PipelineError`: fatal conditions of a whole run, tagged with the phase
//!   they occurred in
//!
//! Collaborator faults arrive as `anyhow::Error` and are folded into these
//! variants with their message preserved.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Station, Stop};
use crate::reconcile::Action;

/// Errors from a single reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Perception unavailable at {station}: {message}")]
    PerceptionUnavailable { station: Station, message: String },

    #[error("No {part_type} in stock for slot {slot} at {station}")]
    StockResolutionFailure {
        station: Station,
        part_type: String,
        slot: usize,
    },

    #[error("{action} failed at {station}: {message}")]
    ActuationFailure {
        station: Station,
        action: Action,
        message: String,
    },

    #[error("Operator declined to {correction} at {station}")]
    Declined { station: Station, correction: String },
}

impl ReconcileError {
    pub fn station(&self) -> Station {
        match self {
            ReconcileError::PerceptionUnavailable { station, .. }
            | ReconcileError::StockResolutionFailure { station, .. }
            | ReconcileError::ActuationFailure { station, .. }
            | ReconcileError::Declined { station, .. } => *station,
        }
    }
}

/// Phase of a run, used to report where a fatal condition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "at", rename_all = "snake_case")]
pub enum RunPhase {
    AwaitOrder,
    Transport(Stop),
    LocateContainer(Station),
    Reconcile(Station),
    Dispatch,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::AwaitOrder => write!(f, "awaiting order"),
            RunPhase::Transport(stop) => write!(f, "transport to {}", stop),
            RunPhase::LocateContainer(station) => write!(f, "locating container at {}", station),
            RunPhase::Reconcile(station) => write!(f, "reconciling at {}", station),
            RunPhase::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Order feed closed before an order arrived")]
    OrderFeedClosed,

    #[error("No order arrived after {attempts} polls")]
    OrderWaitExhausted { attempts: u32 },

    #[error("Order {order_id} has no shipments")]
    EmptyOrder { order_id: String },

    #[error("Transport to {stop} failed: {message}")]
    Transport { stop: Stop, message: String },

    #[error("Container did not reach {stop} after {attempts} status polls")]
    ArrivalWaitExhausted { stop: Stop, attempts: u32 },

    #[error("No container detected at {station}")]
    ContainerNotFound { station: Station },

    #[error("Perception unavailable at {station}: {message}")]
    Perception { station: Station, message: String },

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Dispatch of {shipment_type} not acknowledged after {attempts} attempts")]
    DispatchExhausted { shipment_type: String, attempts: u32 },
}

impl PipelineError {
    pub fn phase(&self) -> RunPhase {
        match self {
            PipelineError::OrderFeedClosed
            | PipelineError::OrderWaitExhausted { .. }
            | PipelineError::EmptyOrder { .. } => RunPhase::AwaitOrder,
            PipelineError::Transport { stop, .. }
            | PipelineError::ArrivalWaitExhausted { stop, .. } => RunPhase::Transport(*stop),
            PipelineError::ContainerNotFound { station }
            | PipelineError::Perception { station, .. } => RunPhase::LocateContainer(*station),
            PipelineError::Reconcile(err) => RunPhase::Reconcile(err.station()),
            PipelineError::DispatchExhausted { .. } => RunPhase::Dispatch,
        }
    }
}
