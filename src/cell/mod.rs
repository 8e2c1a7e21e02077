//! Interfaces to the work cell around the reconciliation core.
//!
//! Everything physical (cameras, the arm, the conveyor, the stock bins, the
//! dispatch drone) sits behind these traits. The engine and the sequencer
//! only sequence calls; a failed call comes back as an `Err` and the caller
//! decides whether it is fatal.
//!
//! Real implementation: a site-specific bridge. Test double: the scripted
//! cells in the engine and sequencer tests. Demo: [`sim::SimCell`].

#[cfg(test)]
pub(crate) mod scripted;
pub mod sim;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{Manifest, Observation, Part, Pose, Shipment, Station, Stop};

/// What the transport controller reports when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stop", rename_all = "snake_case")]
pub enum ConveyorStatus {
    InTransit,
    ArrivedAt(Stop),
}

#[async_trait]
pub trait TransportController: Send + Sync {
    /// Start moving the container towards `stop`. Returns once the command is accepted.
    async fn send_to(&self, stop: Stop) -> Result<()>;

    async fn status(&self) -> Result<ConveyorStatus>;
}

#[async_trait]
pub trait PoseSensor: Send + Sync {
    /// Measured container pose at a station, `None` when no container is seen.
    async fn container_pose(&self, station: Station) -> Result<Option<Pose>>;
}

#[async_trait]
pub trait ManifestProjector: Send + Sync {
    async fn project(
        &self,
        shipment: &Shipment,
        station: Station,
        container_pose: &Pose,
    ) -> Result<Manifest>;
}

#[async_trait]
pub trait InspectionOracle: Send + Sync {
    /// Classify what the station's sensing channel sees against `manifest`.
    async fn inspect(&self, manifest: &Manifest, station: Station) -> Result<Observation>;
}

/// Atomic manipulation primitives. Each call either completes or fails.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn pick_from_container(&self, part: &Part) -> Result<()>;

    async fn pick_from_stock(&self, part: &Part) -> Result<()>;

    /// Drop the grasped part into the discard chute.
    async fn discard(&self, part: &Part) -> Result<()>;

    /// Precompute key pick, approach and place poses for a transfer.
    async fn plan_pick_and_place(&self, source: &Part, destination: &Part) -> Result<()>;

    async fn move_to_approach_pose(&self, destination: &Part) -> Result<()>;

    async fn place_no_release(&self, destination: &Part) -> Result<()>;

    /// Move an already grasped part from `from` to `to` without letting go.
    async fn reposition_no_release(&self, from: &Part, to: &Part) -> Result<()>;

    async fn release_and_retract(&self) -> Result<()>;
}

#[async_trait]
pub trait StockLocator: Send + Sync {
    /// Pull a fresh inventory snapshot.
    async fn refresh(&self) -> Result<()>;

    /// A concrete pickable instance of `part_type` from the latest snapshot.
    async fn resolve(&self, part_type: &str) -> Result<Option<Part>>;
}

#[async_trait]
pub trait DispatchEndpoint: Send + Sync {
    /// Request pickup of the container. `Ok(false)` means not acknowledged yet.
    async fn send(&self, shipment_type: &str) -> Result<bool>;
}

/// Work-session handshake performed once before any order is awaited.
#[async_trait]
pub trait SessionStarter: Send + Sync {
    async fn start(&self) -> Result<()>;
}

/// Handles to every collaborator the core talks to.
#[derive(Clone)]
pub struct Cell {
    pub transport: Arc<dyn TransportController>,
    pub pose_sensor: Arc<dyn PoseSensor>,
    pub projector: Arc<dyn ManifestProjector>,
    pub oracle: Arc<dyn InspectionOracle>,
    pub actuator: Arc<dyn Actuator>,
    pub stock: Arc<dyn StockLocator>,
    pub dispatch: Arc<dyn DispatchEndpoint>,
}

impl Cell {
    /// Build a cell where one object plays every role.
    pub fn from_shared<T>(world: Arc<T>) -> Self
    where
        T: TransportController
            + PoseSensor
            + ManifestProjector
            + InspectionOracle
            + Actuator
            + StockLocator
            + DispatchEndpoint
            + 'static,
    {
        Self {
            transport: world.clone(),
            pose_sensor: world.clone(),
            projector: world.clone(),
            oracle: world.clone(),
            actuator: world.clone(),
            stock: world.clone(),
            dispatch: world,
        }
    }
}
