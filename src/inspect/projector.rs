use anyhow::Result;
use async_trait::async_trait;

use crate::cell::ManifestProjector;
use crate::model::{Location, Manifest, Part, Pose, Shipment, Station};

/// Projects a shipment into the world frame by composing each product pose
/// with the measured container pose.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameProjector;

impl FrameProjector {
    pub fn project_now(shipment: &Shipment, station: Station, container_pose: &Pose) -> Manifest {
        let slots = shipment
            .products
            .iter()
            .map(|product| {
                Part::new(
                    product.part_type.clone(),
                    container_pose.compose(&product.pose),
                    Location::Container(station),
                )
            })
            .collect();
        Manifest::new(station, slots)
    }
}

#[async_trait]
impl ManifestProjector for FrameProjector {
    async fn project(
        &self,
        shipment: &Shipment,
        station: Station,
        container_pose: &Pose,
    ) -> Result<Manifest> {
        Ok(Self::project_now(shipment, station, container_pose))
    }
}
