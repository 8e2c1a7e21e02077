//! Reference classification and projection logic.
//!
//! [`classify`] is the comparison an inspection oracle performs between a
//! manifest and the parts a camera reports. [`FrameProjector`] turns a
//! shipment's container-relative products into a world-frame manifest.

pub mod projector;

pub use projector::FrameProjector;

use serde::{Deserialize, Serialize};

use crate::model::{Manifest, Observation, Part, SlotMatch};

/// How close an observed part must be to a slot to count as in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Metres between positions.
    #[serde(default = "default_position_tolerance")]
    pub position: f64,
    /// Radians between orientations.
    #[serde(default = "default_orientation_tolerance")]
    pub orientation: f64,
}

fn default_position_tolerance() -> f64 {
    0.03
}

fn default_orientation_tolerance() -> f64 {
    0.1
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            position: default_position_tolerance(),
            orientation: default_orientation_tolerance(),
        }
    }
}

impl Tolerance {
    pub fn accepts(&self, observed: &Part, wanted: &Part) -> bool {
        observed.part_type == wanted.part_type
            && observed.pose.distance_to(&wanted.pose) <= self.position
            && observed.pose.angle_to(&wanted.pose) <= self.orientation
    }
}

/// Classify `observed` against `manifest`.
///
/// Pass 1 claims slots for parts already in place. Pass 2 pairs each
/// remaining part with the lowest-index unclaimed slot of its type. What is
/// left over is orphaned (observed) or missing (slots). Every set keeps the
/// order of its input.
pub fn classify(
    manifest: &Manifest,
    observed: &[Part],
    tolerance: &Tolerance,
    defective: Option<Part>,
) -> Observation {
    let mut claimed = vec![false; manifest.len()];
    let mut placed: Vec<Option<usize>> = vec![None; observed.len()];

    for (i, part) in observed.iter().enumerate() {
        let slot = manifest
            .slots()
            .iter()
            .enumerate()
            .find(|(s, wanted)| !claimed[*s] && tolerance.accepts(part, wanted))
            .map(|(s, _)| s);
        if let Some(s) = slot {
            claimed[s] = true;
            placed[i] = Some(s);
        }
    }

    let mut observation = Observation {
        defective,
        ..Default::default()
    };

    for (i, part) in observed.iter().enumerate() {
        if let Some(slot) = placed[i] {
            observation.satisfied.push(SlotMatch {
                observed: part.clone(),
                slot,
            });
            continue;
        }
        let slot = manifest
            .slots()
            .iter()
            .enumerate()
            .find(|(s, wanted)| !claimed[*s] && wanted.part_type == part.part_type)
            .map(|(s, _)| s);
        match slot {
            Some(s) => {
                claimed[s] = true;
                observation.misplaced.push(SlotMatch {
                    observed: part.clone(),
                    slot: s,
                });
            }
            None => observation.orphaned.push(part.clone()),
        }
    }

    observation.missing = claimed
        .iter()
        .enumerate()
        .filter(|(_, taken)| !**taken)
        .map(|(s, _)| s)
        .collect();

    observation
}
