//! Domain types shared by the engine, the sequencer and the collaborators.

pub mod observation;
pub mod order;
pub mod pose;

pub use observation::{Misplaced, Observation, ObservationSummary, SlotMatch};
pub use order::{Manifest, Order, Product, Shipment};
pub use pose::{Point, Pose, Quaternion};

use serde::{Deserialize, Serialize};

/// Inspection station the container is corrected at.
///
/// The engine is otherwise identical at both stations; the station only picks
/// the sensing channel and the transport target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Station {
    Q1,
    Q2,
}

impl Station {
    pub const ALL: [Station; 2] = [Station::Q1, Station::Q2];

    /// Camera / quality-sensor channel used for inspection at this station.
    pub fn sensing_channel(&self) -> u8 {
        match self {
            Station::Q1 => 1,
            Station::Q2 => 2,
        }
    }
}

impl std::fmt::Display for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Station::Q1 => write!(f, "Q1"),
            Station::Q2 => write!(f, "Q2"),
        }
    }
}

impl std::str::FromStr for Station {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "q1" => Ok(Station::Q1),
            "q2" => Ok(Station::Q2),
            _ => anyhow::bail!("Invalid station '{}'. Valid values: q1, q2", s),
        }
    }
}

/// Places the transport controller can send the container to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stop {
    Q1,
    Q2,
    Dispatch,
}

impl From<Station> for Stop {
    fn from(station: Station) -> Self {
        match station {
            Station::Q1 => Stop::Q1,
            Station::Q2 => Stop::Q2,
        }
    }
}

impl std::fmt::Display for Stop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stop::Q1 => write!(f, "Q1"),
            Stop::Q2 => write!(f, "Q2"),
            Stop::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Where a part currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Location {
    Container(Station),
    Bin(u32),
    Gripper,
    Discard,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Container(station) => write!(f, "container@{}", station),
            Location::Bin(id) => write!(f, "bin{}", id),
            Location::Gripper => write!(f, "gripper"),
            Location::Discard => write!(f, "discard"),
        }
    }
}

/// A part as seen or wanted: a type name, a pose, and where it lives.
///
/// Parts carry no identity. Across a pick/place they are matched only by type
/// and pose proximity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part_type: String,
    pub pose: Pose,
    pub location: Location,
}

impl Part {
    pub fn new(part_type: impl Into<String>, pose: Pose, location: Location) -> Self {
        Self {
            part_type: part_type.into(),
            pose,
            location,
        }
    }

    /// Same part, re-tagged to a different location.
    pub fn at_location(&self, location: Location) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} [{}]", self.part_type, self.pose, self.location)
    }
}
