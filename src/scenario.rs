//! Scenario files: a TOML description of one simulated run.
//!
//! ```toml
//! [order]
//! order_id = "order_0"
//!
//! [[order.shipments]]
//! shipment_type = "order_0_shipment_0"
//!
//! [[order.shipments.products]]
//! part_type = "gear_part"
//! pose = { position = { x = 0.1, y = 0.1, z = 0.0 } }
//!
//! [stations.q1]
//! container_pose = { position = { x = 0.5, y = 1.0, z = 0.6 } }
//!
//! [[stock]]
//! bin = 1
//! part_type = "gear_part"
//! pose = { position = { x = -1.0, y = 0.2, z = 0.7 } }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::cell::sim::{SimCell, SimWorld};
use crate::inspect::Tolerance;
use crate::model::{Order, Pose, Station};
use crate::reconcile::Action;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub order: Order,
    #[serde(default)]
    pub stations: StationsSection,
    /// Parts already in the container when the run starts, in container coordinates.
    #[serde(default)]
    pub container: Vec<ScenarioPart>,
    #[serde(default)]
    pub stock: Vec<StockEntry>,
    #[serde(default)]
    pub conveyor: ConveyorSection,
    #[serde(default)]
    pub faults: Vec<FaultEntry>,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationsSection {
    pub q1: Option<StationSetup>,
    pub q2: Option<StationSetup>,
}

impl StationsSection {
    pub fn get(&self, station: Station) -> Option<&StationSetup> {
        match station {
            Station::Q1 => self.q1.as_ref(),
            Station::Q2 => self.q2.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSetup {
    pub container_pose: Pose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioPart {
    pub part_type: String,
    pub pose: Pose,
    #[serde(default)]
    pub faulty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEntry {
    pub bin: u32,
    pub part_type: String,
    pub pose: Pose,
    #[serde(default)]
    pub faulty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConveyorSection {
    #[serde(default)]
    pub travel_polls: u32,
    #[serde(default)]
    pub stall: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEntry {
    pub action: Action,
    /// Omit to fail every time.
    pub times: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub rejections: u32,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid scenario file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse scenario")
    }

    /// Things that will make the run fail or behave oddly, as warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let Some(shipment) = self.order.first_shipment() else {
            warnings.push(format!("Order {} has no shipments", self.order.order_id));
            return warnings;
        };
        if self.order.shipments.len() > 1 {
            warnings.push(format!(
                "Only the first of {} shipments will be filled",
                self.order.shipments.len()
            ));
        }

        for station in Station::ALL {
            if self.stations.get(station).is_none() {
                warnings.push(format!("No container pose for {}", station));
            }
        }

        let stocked: HashSet<&str> = self.stock.iter().map(|s| s.part_type.as_str()).collect();
        for product in &shipment.products {
            if !stocked.contains(product.part_type.as_str())
                && !self.container.iter().any(|p| p.part_type == product.part_type)
            {
                warnings.push(format!("No {} in stock or container", product.part_type));
            }
        }

        if self.conveyor.stall {
            warnings.push("Conveyor is stalled; arrival waits will not end".to_string());
        }

        warnings
    }

    pub fn world(&self, tolerance: Tolerance) -> SimWorld {
        let mut world = SimWorld::new(tolerance);
        for station in Station::ALL {
            if let Some(setup) = self.stations.get(station) {
                world.container_pose(station, setup.container_pose);
            }
        }
        for part in &self.container {
            world.container_part(&part.part_type, part.pose, part.faulty);
        }
        for entry in &self.stock {
            world.stock_part(entry.bin, &entry.part_type, entry.pose, entry.faulty);
        }
        for fault in &self.faults {
            world.fault(fault.action, fault.times);
        }
        world
            .travel_polls(self.conveyor.travel_polls)
            .dispatch_rejections(self.dispatch.rejections);
        if self.conveyor.stall {
            world.stall();
        }
        world
    }

    /// Split into the order to feed and the simulated cell to run it against.
    pub fn into_cell(self, tolerance: Tolerance) -> (Order, Arc<SimCell>) {
        let cell = Arc::new(SimCell::new(self.world(tolerance)));
        (self.order, cell)
    }
}
