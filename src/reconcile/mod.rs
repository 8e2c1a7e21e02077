//! Reconciliation engine: drive one container at one station to its manifest.
//!
//! The engine is a priority cascade over a fresh [`Observation`]:
//!
//! | Stage                 | Set acted on       | Correction                                   |
//! |-----------------------|--------------------|----------------------------------------------|
//! | `RemoveDefective`     | defective part     | pick from container, discard                 |
//! | `RemoveOrphans`       | `orphaned[0]`      | pick from container, discard                 |
//! | `RepositionMisplaced` | `misplaced[0]`     | pick, reposition without release, release    |
//! | `ReplenishMissing`    | `missing[0]`       | resolve stock, pick, approach, place, release|
//!
//! Exactly one correction is issued per observation, and the container is
//! re-inspected after every correction.

pub mod engine;
pub mod gate;

pub use engine::ReconcileEngine;
pub use gate::{ActionGate, AutoApprove, ConsoleGate};

use serde::{Deserialize, Serialize};

use crate::model::{Observation, ObservationSummary, Part, Station};

/// One actuator primitive, named for error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    PickFromContainer,
    PickFromStock,
    Discard,
    MoveToApproach,
    PlaceNoRelease,
    RepositionNoRelease,
    ReleaseAndRetract,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::PickFromContainer => "pick from container",
            Action::PickFromStock => "pick from stock",
            Action::Discard => "discard",
            Action::MoveToApproach => "move to approach pose",
            Action::PlaceNoRelease => "place without release",
            Action::RepositionNoRelease => "reposition without release",
            Action::ReleaseAndRetract => "release and retract",
        };
        write!(f, "{}", name)
    }
}

/// Cascade stages in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RemoveDefective,
    RemoveOrphans,
    RepositionMisplaced,
    ReplenishMissing,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::RemoveDefective,
        Stage::RemoveOrphans,
        Stage::RepositionMisplaced,
        Stage::ReplenishMissing,
    ];
}

/// The single corrective step chosen from an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    RemoveDefective { part: Part },
    RemoveOrphan { part: Part },
    Reposition { from: Part, to: Part, slot: usize },
    Replenish { slot: usize, wanted: Part },
}

impl Correction {
    pub fn stage(&self) -> Stage {
        match self {
            Correction::RemoveDefective { .. } => Stage::RemoveDefective,
            Correction::RemoveOrphan { .. } => Stage::RemoveOrphans,
            Correction::Reposition { .. } => Stage::RepositionMisplaced,
            Correction::Replenish { .. } => Stage::ReplenishMissing,
        }
    }
}

impl std::fmt::Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Correction::RemoveDefective { part } => {
                write!(f, "remove defective {} at {}", part.part_type, part.pose)
            }
            Correction::RemoveOrphan { part } => {
                write!(f, "remove orphaned {} at {}", part.part_type, part.pose)
            }
            Correction::Reposition { from, to, slot } => write!(
                f,
                "reposition {} from {} to {} (slot {})",
                from.part_type, from.pose, to.pose, slot
            ),
            Correction::Replenish { slot, wanted } => write!(
                f,
                "replenish slot {} with {} at {}",
                slot, wanted.part_type, wanted.pose
            ),
        }
    }
}

/// When a station counts as done.
///
/// Both modes always pick the next correction from the top of the cascade,
/// so a reposition or replenish never runs while a defective or orphaned part
/// is reported.
///
/// | Mode     | Done when                                                   |
/// |----------|-------------------------------------------------------------|
/// | `Staged` | nothing is left, or a replenish has emptied `missing`       |
/// | `Full`   | an observation is entirely clean                            |
///
/// `Staged` does not look at the other sets once replenishment has filled
/// every slot, so a part disturbed by the last placement can remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergenceMode {
    #[default]
    Staged,
    Full,
}

impl std::fmt::Display for ConvergenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergenceMode::Staged => write!(f, "staged"),
            ConvergenceMode::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for ConvergenceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "staged" => Ok(ConvergenceMode::Staged),
            "full" => Ok(ConvergenceMode::Full),
            _ => anyhow::bail!(
                "Invalid convergence mode '{}'. Valid values: staged, full",
                s
            ),
        }
    }
}

/// Engine knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSettings {
    pub convergence: ConvergenceMode,
    /// Extra attempts per actuator call before the failure is fatal. Zero
    /// keeps every actuation failure fatal on first occurrence.
    pub actuation_retries: u32,
}

/// Result of a successful reconciliation at one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergedState {
    pub station: Station,
    pub inspections: u32,
    pub corrections: u32,
    /// Whether the last observation was entirely clean. Always true in
    /// `Full` mode; `Staged` mode can finish with earlier-stage residue.
    pub fully_converged: bool,
    pub final_observation: Observation,
}

/// Progress notifications emitted while reconciling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Inspected {
        station: Station,
        summary: ObservationSummary,
    },
    Correcting {
        station: Station,
        correction: Correction,
    },
    Converged {
        station: Station,
        inspections: u32,
        corrections: u32,
        fully_converged: bool,
    },
    Failed {
        station: Station,
        error: String,
    },
}
