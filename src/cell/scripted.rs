//! Test double: a cell that replays queued observations and records every call.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::*;
use crate::inspect::FrameProjector;
use crate::reconcile::Action;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start,
    SendTo(Stop),
    Status,
    ContainerPose(Station),
    Project(Station),
    Inspect(Station),
    PickFromContainer(String),
    PickFromStock(String),
    Discard(String),
    Plan,
    MoveToApproach(String),
    PlaceNoRelease(String),
    Reposition { from: Pose, to: Pose },
    ReleaseAndRetract,
    Refresh,
    Resolve(String),
    Dispatch(String),
}

impl Call {
    fn is_actuation(&self) -> bool {
        matches!(
            self,
            Call::PickFromContainer(_)
                | Call::PickFromStock(_)
                | Call::Discard(_)
                | Call::Plan
                | Call::MoveToApproach(_)
                | Call::PlaceNoRelease(_)
                | Call::Reposition { .. }
                | Call::ReleaseAndRetract
        )
    }
}

#[derive(Default)]
struct Script {
    observations: VecDeque<Observation>,
    last: Observation,
    calls: Vec<Call>,
    stock: HashMap<String, Part>,
    failures: HashMap<Action, u32>,
    fail_planning: bool,
    fail_inspection: bool,
    fail_transport: bool,
    hidden: Vec<Station>,
    travel_polls: u32,
    remaining_polls: u32,
    stalled: bool,
    target: Option<Stop>,
    dispatch_rejections: u32,
}

/// Replays observations in order; once the queue is drained the last one
/// repeats.
#[derive(Default)]
pub struct ScriptedCell {
    script: Mutex<Script>,
}

impl ScriptedCell {
    pub fn with_observations(observations: Vec<Observation>) -> Arc<Self> {
        let cell = Self::default();
        cell.lock().observations = observations.into();
        Arc::new(cell)
    }

    pub fn as_cell(self: &Arc<Self>) -> Cell {
        Cell::from_shared(self.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn stock(&self, part_type: &str, part: Part) {
        self.lock().stock.insert(part_type.to_string(), part);
    }

    /// Make `action` fail its next `times` calls.
    pub fn fail(&self, action: Action, times: u32) {
        self.lock().failures.insert(action, times);
    }

    pub fn fail_planning(&self) {
        self.lock().fail_planning = true;
    }

    pub fn fail_inspection(&self) {
        self.lock().fail_inspection = true;
    }

    pub fn fail_transport(&self) {
        self.lock().fail_transport = true;
    }

    pub fn hide_container(&self, station: Station) {
        self.lock().hidden.push(station);
    }

    pub fn travel_polls(&self, polls: u32) {
        self.lock().travel_polls = polls;
    }

    /// The conveyor never reports arrival.
    pub fn stall(&self) {
        self.lock().stalled = true;
    }

    pub fn reject_dispatch(&self, times: u32) {
        self.lock().dispatch_rejections = times;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn actuation_count(&self) -> usize {
        self.count(Call::is_actuation)
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }

    fn actuate(&self, call: Call, action: Action) -> Result<()> {
        let mut script = self.lock();
        script.calls.push(call);
        if let Some(left) = script.failures.get_mut(&action)
            && *left > 0
        {
            *left -= 1;
            bail!("{} faulted", action);
        }
        Ok(())
    }
}

#[async_trait]
impl TransportController for ScriptedCell {
    async fn send_to(&self, stop: Stop) -> Result<()> {
        let mut script = self.lock();
        script.calls.push(Call::SendTo(stop));
        if script.fail_transport {
            bail!("conveyor jammed");
        }
        script.target = Some(stop);
        script.remaining_polls = script.travel_polls;
        Ok(())
    }

    async fn status(&self) -> Result<ConveyorStatus> {
        let mut script = self.lock();
        script.calls.push(Call::Status);
        if script.stalled {
            return Ok(ConveyorStatus::InTransit);
        }
        if script.remaining_polls > 0 {
            script.remaining_polls -= 1;
            return Ok(ConveyorStatus::InTransit);
        }
        Ok(match script.target {
            Some(stop) => ConveyorStatus::ArrivedAt(stop),
            None => ConveyorStatus::InTransit,
        })
    }
}

#[async_trait]
impl PoseSensor for ScriptedCell {
    async fn container_pose(&self, station: Station) -> Result<Option<Pose>> {
        let mut script = self.lock();
        script.calls.push(Call::ContainerPose(station));
        if script.hidden.contains(&station) {
            return Ok(None);
        }
        Ok(Some(Pose::identity()))
    }
}

#[async_trait]
impl ManifestProjector for ScriptedCell {
    async fn project(
        &self,
        shipment: &Shipment,
        station: Station,
        container_pose: &Pose,
    ) -> Result<Manifest> {
        self.record(Call::Project(station));
        Ok(FrameProjector::project_now(shipment, station, container_pose))
    }
}

#[async_trait]
impl InspectionOracle for ScriptedCell {
    async fn inspect(&self, _manifest: &Manifest, station: Station) -> Result<Observation> {
        let mut script = self.lock();
        script.calls.push(Call::Inspect(station));
        if script.fail_inspection {
            bail!("camera offline");
        }
        if let Some(next) = script.observations.pop_front() {
            script.last = next;
        }
        Ok(script.last.clone())
    }
}

#[async_trait]
impl Actuator for ScriptedCell {
    async fn pick_from_container(&self, part: &Part) -> Result<()> {
        self.actuate(
            Call::PickFromContainer(part.part_type.clone()),
            Action::PickFromContainer,
        )
    }

    async fn pick_from_stock(&self, part: &Part) -> Result<()> {
        self.actuate(
            Call::PickFromStock(part.part_type.clone()),
            Action::PickFromStock,
        )
    }

    async fn discard(&self, part: &Part) -> Result<()> {
        self.actuate(Call::Discard(part.part_type.clone()), Action::Discard)
    }

    async fn plan_pick_and_place(&self, _source: &Part, _destination: &Part) -> Result<()> {
        let mut script = self.lock();
        script.calls.push(Call::Plan);
        if script.fail_planning {
            bail!("no inverse kinematics solution");
        }
        Ok(())
    }

    async fn move_to_approach_pose(&self, destination: &Part) -> Result<()> {
        self.actuate(
            Call::MoveToApproach(destination.part_type.clone()),
            Action::MoveToApproach,
        )
    }

    async fn place_no_release(&self, destination: &Part) -> Result<()> {
        self.actuate(
            Call::PlaceNoRelease(destination.part_type.clone()),
            Action::PlaceNoRelease,
        )
    }

    async fn reposition_no_release(&self, from: &Part, to: &Part) -> Result<()> {
        self.actuate(
            Call::Reposition {
                from: from.pose,
                to: to.pose,
            },
            Action::RepositionNoRelease,
        )
    }

    async fn release_and_retract(&self) -> Result<()> {
        self.actuate(Call::ReleaseAndRetract, Action::ReleaseAndRetract)
    }
}

#[async_trait]
impl StockLocator for ScriptedCell {
    async fn refresh(&self) -> Result<()> {
        self.record(Call::Refresh);
        Ok(())
    }

    async fn resolve(&self, part_type: &str) -> Result<Option<Part>> {
        let mut script = self.lock();
        script.calls.push(Call::Resolve(part_type.to_string()));
        Ok(script.stock.get(part_type).cloned())
    }
}

#[async_trait]
impl DispatchEndpoint for ScriptedCell {
    async fn send(&self, shipment_type: &str) -> Result<bool> {
        let mut script = self.lock();
        script.calls.push(Call::Dispatch(shipment_type.to_string()));
        if script.dispatch_rejections > 0 {
            script.dispatch_rejections -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl SessionStarter for ScriptedCell {
    async fn start(&self) -> Result<()> {
        self.record(Call::Start);
        Ok(())
    }
}
