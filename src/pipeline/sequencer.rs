//! Drives one container through Q1, Q2 and dispatch.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span, warn};

use super::poll::{PollOutcome, PollPolicy, poll_until};
use crate::cell::{Cell, ConveyorStatus};
use crate::errors::PipelineError;
use crate::model::{Manifest, Order, Shipment, Station, Stop};
use crate::reconcile::{
    ActionGate, ConvergedState, EngineEvent, ReconcileEngine, ReconcileSettings,
};

/// Timing knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub arrival: PollPolicy,
    pub dispatch: PollPolicy,
    /// Nominal budget for a run. Reported in the outcome, never enforced.
    pub time_budget: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            arrival: PollPolicy::every(Duration::from_millis(100)),
            dispatch: PollPolicy::every(Duration::from_millis(500)),
            time_budget: Duration::from_secs(500),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentOutcome {
    pub order_id: String,
    pub shipment_type: String,
    pub stations: Vec<ConvergedState>,
    pub dispatch_attempts: u32,
    pub elapsed: Duration,
    pub over_budget: bool,
}

pub struct Sequencer {
    cell: Cell,
    settings: PipelineSettings,
    engine: ReconcileEngine,
}

impl Sequencer {
    pub fn new(cell: Cell, settings: PipelineSettings, reconcile: ReconcileSettings) -> Self {
        let engine = ReconcileEngine::new(cell.clone(), reconcile);
        Self {
            cell,
            settings,
            engine,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ActionGate>) -> Self {
        self.engine = self.engine.with_gate(gate);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.engine = self.engine.with_event_channel(tx);
        self
    }

    /// Fill and dispatch the order's first shipment.
    pub async fn run(&self, order: &Order) -> Result<ShipmentOutcome, PipelineError> {
        let span = info_span!("shipment", order_id = %order.order_id);
        self.run_order(order).instrument(span).await
    }

    async fn run_order(&self, order: &Order) -> Result<ShipmentOutcome, PipelineError> {
        let started = Instant::now();
        let shipment = order
            .first_shipment()
            .ok_or_else(|| PipelineError::EmptyOrder {
                order_id: order.order_id.clone(),
            })?;
        if order.shipments.len() > 1 {
            warn!(
                "Order has {} shipments; only {} will be filled",
                order.shipments.len(),
                shipment.shipment_type
            );
        }
        info!(
            shipment_type = %shipment.shipment_type,
            products = shipment.products.len(),
            "Filling shipment"
        );

        let mut stations = Vec::with_capacity(Station::ALL.len());
        for station in Station::ALL {
            self.move_to(Stop::from(station)).await?;
            let manifest = self.project_at(shipment, station).await?;
            stations.push(self.engine.reconcile(&manifest, station).await?);
        }

        self.move_to(Stop::Dispatch).await?;
        let dispatch_attempts = self.dispatch(&shipment.shipment_type).await?;

        let elapsed = started.elapsed();
        let over_budget = elapsed > self.settings.time_budget;
        if over_budget {
            warn!(
                "Shipment took {:.1}s, over the {}s budget",
                elapsed.as_secs_f64(),
                self.settings.time_budget.as_secs()
            );
        }
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            "Shipment {} dispatched", shipment.shipment_type
        );

        Ok(ShipmentOutcome {
            order_id: order.order_id.clone(),
            shipment_type: shipment.shipment_type.clone(),
            stations,
            dispatch_attempts,
            elapsed,
            over_budget,
        })
    }

    /// Send the container to `stop` and wait until it is reported there.
    pub async fn move_to(&self, stop: Stop) -> Result<(), PipelineError> {
        transport_to(&self.cell, stop, &self.settings.arrival).await
    }

    async fn project_at(
        &self,
        shipment: &Shipment,
        station: Station,
    ) -> Result<Manifest, PipelineError> {
        let perception = |e: anyhow::Error| PipelineError::Perception {
            station,
            message: format!("{:#}", e),
        };
        let pose = self
            .cell
            .pose_sensor
            .container_pose(station)
            .await
            .map_err(perception)?
            .ok_or(PipelineError::ContainerNotFound { station })?;
        info!(%station, "Container detected at {}", pose);

        let manifest = self
            .cell
            .projector
            .project(shipment, station, &pose)
            .await
            .map_err(perception)?;
        Ok(manifest)
    }

    async fn dispatch(&self, shipment_type: &str) -> Result<u32, PipelineError> {
        let dispatch = &self.cell.dispatch;
        let outcome = poll_until(
            &self.settings.dispatch,
            "dispatch acknowledgement",
            |attempt| async move {
                match dispatch.send(shipment_type).await {
                    Ok(true) => Ok::<_, PipelineError>(Some(())),
                    Ok(false) => {
                        info!(attempt, "Dispatch not acknowledged yet, retrying");
                        Ok(None)
                    }
                    Err(e) => {
                        warn!(attempt, "Dispatch request failed, retrying: {:#}", e);
                        Ok(None)
                    }
                }
            },
        )
        .await?;

        match outcome {
            PollOutcome::Ready { attempts, .. } => Ok(attempts),
            PollOutcome::Exhausted { attempts } => Err(PipelineError::DispatchExhausted {
                shipment_type: shipment_type.to_string(),
                attempts,
            }),
        }
    }
}

/// Command the conveyor to `stop` and poll its status until it arrives.
pub async fn transport_to(
    cell: &Cell,
    stop: Stop,
    policy: &PollPolicy,
) -> Result<(), PipelineError> {
    let transport_error = |e: anyhow::Error| PipelineError::Transport {
        stop,
        message: format!("{:#}", e),
    };

    info!(%stop, "Sending container");
    cell.transport.send_to(stop).await.map_err(transport_error)?;

    let transport = &cell.transport;
    let waiting_for = format!("arrival at {}", stop);
    let outcome = poll_until(policy, &waiting_for, |_| async move {
        match transport.status().await.map_err(transport_error)? {
            ConveyorStatus::ArrivedAt(at) if at == stop => Ok::<_, PipelineError>(Some(())),
            _ => Ok(None),
        }
    })
    .await?;

    match outcome {
        PollOutcome::Ready { attempts, .. } => {
            info!(%stop, polls = attempts, "Container arrived");
            Ok(())
        }
        PollOutcome::Exhausted { attempts } => {
            Err(PipelineError::ArrivalWaitExhausted { stop, attempts })
        }
    }
}
