//! In-memory work cell.
//!
//! Container contents are stored in the container's own frame, so they ride
//! along when the conveyor moves the container between stations. Each
//! station sees the container at its own measured pose.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    Actuator, ConveyorStatus, DispatchEndpoint, InspectionOracle, ManifestProjector, PoseSensor,
    SessionStarter, StockLocator, TransportController,
};
use crate::inspect::{FrameProjector, Tolerance, classify};
use crate::model::{Location, Manifest, Observation, Part, Pose, Shipment, Station, Stop};
use crate::reconcile::Action;

#[derive(Debug, Clone, PartialEq)]
struct ContainerPart {
    part_type: String,
    /// Pose in the container frame.
    local: Pose,
    faulty: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct StockPart {
    bin: u32,
    part_type: String,
    pose: Pose,
    faulty: bool,
}

#[derive(Debug, Clone)]
struct Held {
    part_type: String,
    faulty: bool,
    /// World pose the part has been lowered to, if any.
    lowered_to: Option<Pose>,
}

/// Initial state of a simulated cell.
#[derive(Debug, Default)]
pub struct SimWorld {
    container: Vec<ContainerPart>,
    container_poses: HashMap<Station, Pose>,
    stock: Vec<StockPart>,
    travel_polls: u32,
    stalled: bool,
    faults: HashMap<Action, Option<u32>>,
    dispatch_rejections: u32,
    tolerance: Tolerance,
}

impl SimWorld {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            ..Default::default()
        }
    }

    /// Where the container sits when it is at `station`. Stations without a
    /// pose never detect the container.
    pub fn container_pose(&mut self, station: Station, pose: Pose) -> &mut Self {
        self.container_poses.insert(station, pose);
        self
    }

    pub fn container_part(&mut self, part_type: &str, local: Pose, faulty: bool) -> &mut Self {
        self.container.push(ContainerPart {
            part_type: part_type.to_string(),
            local,
            faulty,
        });
        self
    }

    pub fn stock_part(&mut self, bin: u32, part_type: &str, pose: Pose, faulty: bool) -> &mut Self {
        self.stock.push(StockPart {
            bin,
            part_type: part_type.to_string(),
            pose,
            faulty,
        });
        self
    }

    /// Status polls the conveyor reports `InTransit` after each `send_to`.
    pub fn travel_polls(&mut self, polls: u32) -> &mut Self {
        self.travel_polls = polls;
        self
    }

    /// Conveyor never arrives anywhere.
    pub fn stall(&mut self) -> &mut Self {
        self.stalled = true;
        self
    }

    /// Make `action` fail `times` times, or always when `None`.
    pub fn fault(&mut self, action: Action, times: Option<u32>) -> &mut Self {
        self.faults.insert(action, times);
        self
    }

    /// Dispatch requests go unacknowledged this many times.
    pub fn dispatch_rejections(&mut self, times: u32) -> &mut Self {
        self.dispatch_rejections = times;
        self
    }
}

#[derive(Debug)]
struct State {
    world: SimWorld,
    at: Option<Stop>,
    target: Option<Stop>,
    remaining_polls: u32,
    gripper: Option<Held>,
    snapshot: Vec<Part>,
    discarded: Vec<String>,
    dispatched: Option<String>,
    session_started: bool,
}

/// A snapshot of the simulated cell, for reports and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SimReport {
    pub container: Vec<String>,
    pub discarded: Vec<String>,
    pub dispatched: Option<String>,
    pub session_started: bool,
}

pub struct SimCell {
    state: Mutex<State>,
}

impl SimCell {
    pub fn new(world: SimWorld) -> Self {
        Self {
            state: Mutex::new(State {
                world,
                at: None,
                target: None,
                remaining_polls: 0,
                gripper: None,
                snapshot: Vec::new(),
                discarded: Vec::new(),
                dispatched: None,
                session_started: false,
            }),
        }
    }

    pub async fn report(&self) -> SimReport {
        let state = self.state.lock().await;
        SimReport {
            container: state
                .world
                .container
                .iter()
                .map(|p| p.part_type.clone())
                .collect(),
            discarded: state.discarded.clone(),
            dispatched: state.dispatched.clone(),
            session_started: state.session_started,
        }
    }
}

impl State {
    /// Consume one injected failure for `action`, if any is left.
    fn check_fault(&mut self, action: Action) -> Result<()> {
        match self.world.faults.get_mut(&action) {
            Some(None) => bail!("simulated fault during {}", action),
            Some(Some(left)) if *left > 0 => {
                *left -= 1;
                bail!("simulated fault during {}", action)
            }
            _ => Ok(()),
        }
    }

    /// Pose of the container frame if it is parked at `station`.
    fn frame_at(&self, station: Station) -> Option<Pose> {
        if self.at != Some(Stop::from(station)) {
            return None;
        }
        self.world.container_poses.get(&station).copied()
    }

    /// The station the container is parked at, with its frame.
    fn current_frame(&self) -> Result<(Station, Pose)> {
        Station::ALL
            .into_iter()
            .find_map(|s| self.frame_at(s).map(|frame| (s, frame)))
            .context("container is not parked at an inspection station")
    }

    fn grasp(&mut self, held: Held) -> Result<()> {
        if let Some(ref current) = self.gripper {
            bail!("gripper already holds {}", current.part_type);
        }
        self.gripper = Some(held);
        Ok(())
    }

    fn held_mut(&mut self) -> Result<&mut Held> {
        self.gripper.as_mut().context("gripper is empty")
    }
}

#[async_trait]
impl TransportController for SimCell {
    async fn send_to(&self, stop: Stop) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(%stop, "sim: conveyor moving");
        state.at = None;
        state.target = Some(stop);
        state.remaining_polls = state.world.travel_polls;
        Ok(())
    }

    async fn status(&self) -> Result<ConveyorStatus> {
        let mut state = self.state.lock().await;
        if state.world.stalled {
            return Ok(ConveyorStatus::InTransit);
        }
        if state.remaining_polls > 0 {
            state.remaining_polls -= 1;
            return Ok(ConveyorStatus::InTransit);
        }
        match state.target {
            Some(stop) => {
                state.at = Some(stop);
                Ok(ConveyorStatus::ArrivedAt(stop))
            }
            None => Ok(ConveyorStatus::InTransit),
        }
    }
}

#[async_trait]
impl PoseSensor for SimCell {
    async fn container_pose(&self, station: Station) -> Result<Option<Pose>> {
        Ok(self.state.lock().await.frame_at(station))
    }
}

#[async_trait]
impl ManifestProjector for SimCell {
    async fn project(
        &self,
        shipment: &Shipment,
        station: Station,
        container_pose: &Pose,
    ) -> Result<Manifest> {
        Ok(FrameProjector::project_now(shipment, station, container_pose))
    }
}

#[async_trait]
impl InspectionOracle for SimCell {
    async fn inspect(&self, manifest: &Manifest, station: Station) -> Result<Observation> {
        let state = self.state.lock().await;
        let frame = state.frame_at(station).with_context(|| {
            format!(
                "camera {} does not see a container",
                station.sensing_channel()
            )
        })?;

        let to_world = |p: &ContainerPart| {
            Part::new(
                p.part_type.clone(),
                frame.compose(&p.local),
                Location::Container(station),
            )
        };
        let observed: Vec<Part> = state.world.container.iter().map(to_world).collect();
        let defective = state
            .world
            .container
            .iter()
            .find(|p| p.faulty)
            .map(to_world);

        Ok(classify(
            manifest,
            &observed,
            &state.world.tolerance,
            defective,
        ))
    }
}

#[async_trait]
impl Actuator for SimCell {
    async fn pick_from_container(&self, part: &Part) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::PickFromContainer)?;
        let (_, frame) = state.current_frame()?;
        let tolerance = state.world.tolerance.position;
        let index = state
            .world
            .container
            .iter()
            .position(|p| {
                p.part_type == part.part_type
                    && frame.compose(&p.local).distance_to(&part.pose) <= tolerance
            })
            .with_context(|| format!("no {} at {} in the container", part.part_type, part.pose))?;
        let taken = state.world.container[index].clone();
        state.grasp(Held {
            part_type: taken.part_type,
            faulty: taken.faulty,
            lowered_to: None,
        })?;
        state.world.container.remove(index);
        debug!("sim: picked {} from container", part.part_type);
        Ok(())
    }

    async fn pick_from_stock(&self, part: &Part) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::PickFromStock)?;
        let index = state
            .world
            .stock
            .iter()
            .position(|s| s.part_type == part.part_type && s.pose.distance_to(&part.pose) <= 1e-6)
            .with_context(|| format!("no {} at {} in stock", part.part_type, part.pose))?;
        let taken = state.world.stock[index].clone();
        state.grasp(Held {
            part_type: taken.part_type,
            faulty: taken.faulty,
            lowered_to: None,
        })?;
        state.world.stock.remove(index);
        debug!("sim: picked {} from bin{}", part.part_type, taken.bin);
        Ok(())
    }

    async fn discard(&self, _part: &Part) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::Discard)?;
        let held = state.gripper.take().context("gripper is empty")?;
        debug!("sim: discarded {}", held.part_type);
        state.discarded.push(held.part_type);
        Ok(())
    }

    async fn plan_pick_and_place(&self, _source: &Part, _destination: &Part) -> Result<()> {
        Ok(())
    }

    async fn move_to_approach_pose(&self, _destination: &Part) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::MoveToApproach)?;
        state.held_mut()?;
        Ok(())
    }

    async fn place_no_release(&self, destination: &Part) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::PlaceNoRelease)?;
        state.held_mut()?.lowered_to = Some(destination.pose);
        Ok(())
    }

    async fn reposition_no_release(&self, _from: &Part, to: &Part) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::RepositionNoRelease)?;
        state.held_mut()?.lowered_to = Some(to.pose);
        Ok(())
    }

    async fn release_and_retract(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_fault(Action::ReleaseAndRetract)?;
        let (station, frame) = state.current_frame()?;
        let world_pose = state
            .gripper
            .as_ref()
            .context("gripper is empty")?
            .lowered_to
            .context("part has not been lowered into the container")?;
        let Some(held) = state.gripper.take() else {
            bail!("gripper is empty");
        };
        debug!(%station, "sim: released {} at {}", held.part_type, world_pose);
        state.world.container.push(ContainerPart {
            part_type: held.part_type,
            local: frame.inverse().compose(&world_pose),
            faulty: held.faulty,
        });
        Ok(())
    }
}

#[async_trait]
impl StockLocator for SimCell {
    async fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.snapshot = state
            .world
            .stock
            .iter()
            .map(|s| Part::new(s.part_type.clone(), s.pose, Location::Bin(s.bin)))
            .collect();
        Ok(())
    }

    async fn resolve(&self, part_type: &str) -> Result<Option<Part>> {
        let state = self.state.lock().await;
        Ok(state
            .snapshot
            .iter()
            .find(|p| p.part_type == part_type)
            .cloned())
    }
}

#[async_trait]
impl DispatchEndpoint for SimCell {
    async fn send(&self, shipment_type: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.at != Some(Stop::Dispatch) {
            return Ok(false);
        }
        if state.world.dispatch_rejections > 0 {
            state.world.dispatch_rejections -= 1;
            return Ok(false);
        }
        state.dispatched = Some(shipment_type.to_string());
        Ok(true)
    }
}

#[async_trait]
impl SessionStarter for SimCell {
    async fn start(&self) -> Result<()> {
        self.state.lock().await.session_started = true;
        Ok(())
    }
}
