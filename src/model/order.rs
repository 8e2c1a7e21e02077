use serde::{Deserialize, Serialize};

use super::{Part, Pose, Station};

/// A customer order as delivered by the order feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub shipments: Vec<Shipment>,
}

impl Order {
    /// The shipment this run fills. Only the first shipment is handled.
    pub fn first_shipment(&self) -> Option<&Shipment> {
        self.shipments.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_type: String,
    #[serde(default)]
    pub products: Vec<Product>,
}

/// One wanted part, posed relative to the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub part_type: String,
    pub pose: Pose,
}

/// Desired part placements for one container at one station, in the world frame.
///
/// A manifest is fixed once projected. Re-projecting (e.g. at the next
/// station) produces a new value rather than editing this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    station: Station,
    slots: Vec<Part>,
}

impl Manifest {
    pub fn new(station: Station, slots: Vec<Part>) -> Self {
        Self { station, slots }
    }

    pub fn station(&self) -> Station {
        self.station
    }

    pub fn slots(&self) -> &[Part] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&Part> {
        self.slots.get(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
