//! The per-station correction loop.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::gate::{ActionGate, AutoApprove};
use super::{
    Action, ConvergedState, ConvergenceMode, Correction, EngineEvent, ReconcileSettings, Stage,
};
use crate::cell::Cell;
use crate::errors::ReconcileError;
use crate::model::{Manifest, Observation, Part, Station};

/// Drives one container at one station until its observation converges.
///
/// The engine holds no state between calls; the same engine serves both
/// stations.
pub struct ReconcileEngine {
    cell: Cell,
    settings: ReconcileSettings,
    gate: Arc<dyn ActionGate>,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
}

/// Inspection and correction counters for one `reconcile` call.
#[derive(Debug, Default)]
struct Tally {
    inspections: u32,
    corrections: u32,
}

impl ReconcileEngine {
    pub fn new(cell: Cell, settings: ReconcileSettings) -> Self {
        Self {
            cell,
            settings,
            gate: Arc::new(AutoApprove),
            event_tx: None,
        }
    }

    /// Ask `gate` before every correction.
    pub fn with_gate(mut self, gate: Arc<dyn ActionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Correct the container at `station` until nothing is left to do, or a
    /// fatal condition is hit.
    pub async fn reconcile(
        &self,
        manifest: &Manifest,
        station: Station,
    ) -> Result<ConvergedState, ReconcileError> {
        let span = info_span!("reconcile", %station, slots = manifest.len());
        let result = self.run_cascade(manifest, station).instrument(span).await;
        if let Err(ref e) = result {
            error!(%station, "Reconciliation failed: {}", e);
            self.emit(EngineEvent::Failed {
                station,
                error: e.to_string(),
            })
            .await;
        }
        result
    }

    async fn run_cascade(
        &self,
        manifest: &Manifest,
        station: Station,
    ) -> Result<ConvergedState, ReconcileError> {
        let mut tally = Tally::default();
        let mut observation = self.inspect(manifest, station, &mut tally).await?;
        let mut replenished = false;

        while let Some(correction) = select_correction(&observation, manifest, station)? {
            // Staged mode leaves as soon as replenishment has emptied the missing set.
            if self.settings.convergence == ConvergenceMode::Staged
                && replenished
                && observation.missing.is_empty()
            {
                break;
            }
            replenished |= correction.stage() == Stage::ReplenishMissing;

            self.confirm(station, &correction).await?;
            info!("Correction {}: {}", tally.corrections + 1, correction);
            self.emit(EngineEvent::Correcting {
                station,
                correction: correction.clone(),
            })
            .await;

            self.apply(station, &correction).await?;
            tally.corrections += 1;

            observation = self.inspect(manifest, station, &mut tally).await?;
        }

        let fully_converged = observation.is_converged();
        if fully_converged {
            info!(
                inspections = tally.inspections,
                corrections = tally.corrections,
                "Container matches manifest"
            );
        } else {
            warn!(
                summary = %observation.summary(),
                "Slots filled; leaving station with corrections outstanding"
            );
        }

        self.emit(EngineEvent::Converged {
            station,
            inspections: tally.inspections,
            corrections: tally.corrections,
            fully_converged,
        })
        .await;

        Ok(ConvergedState {
            station,
            inspections: tally.inspections,
            corrections: tally.corrections,
            fully_converged,
            final_observation: observation,
        })
    }

    async fn inspect(
        &self,
        manifest: &Manifest,
        station: Station,
        tally: &mut Tally,
    ) -> Result<Observation, ReconcileError> {
        let observation = self
            .cell
            .oracle
            .inspect(manifest, station)
            .await
            .map_err(|e| ReconcileError::PerceptionUnavailable {
                station,
                message: format!("{:#}", e),
            })?;
        tally.inspections += 1;

        let summary = observation.summary();
        info!(inspection = tally.inspections, "{}", summary);
        for part in &observation.orphaned {
            debug!("Orphaned: {}", part);
        }
        if let Some(ref part) = observation.defective {
            debug!("Defective: {}", part);
        }
        self.emit(EngineEvent::Inspected { station, summary }).await;

        Ok(observation)
    }

    async fn confirm(
        &self,
        station: Station,
        correction: &Correction,
    ) -> Result<(), ReconcileError> {
        let approved = match self.gate.confirm(station, correction).await {
            Ok(approved) => approved,
            Err(e) => {
                warn!("Confirmation failed, treating as declined: {:#}", e);
                false
            }
        };
        if approved {
            Ok(())
        } else {
            Err(ReconcileError::Declined {
                station,
                correction: correction.to_string(),
            })
        }
    }

    async fn apply(&self, station: Station, correction: &Correction) -> Result<(), ReconcileError> {
        let actuator = &self.cell.actuator;
        match correction {
            Correction::RemoveDefective { part } | Correction::RemoveOrphan { part } => {
                self.act(station, Action::PickFromContainer, move || {
                    actuator.pick_from_container(part)
                })
                .await?;
                self.act(station, Action::Discard, move || actuator.discard(part))
                    .await
            }
            Correction::Reposition { from, to, .. } => {
                self.act(station, Action::PickFromContainer, move || {
                    actuator.pick_from_container(from)
                })
                .await?;
                self.act(station, Action::RepositionNoRelease, move || {
                    actuator.reposition_no_release(from, to)
                })
                .await?;
                self.act(station, Action::ReleaseAndRetract, move || {
                    actuator.release_and_retract()
                })
                .await
            }
            Correction::Replenish { slot, wanted } => self.replenish(station, *slot, wanted).await,
        }
    }

    async fn replenish(
        &self,
        station: Station,
        slot: usize,
        wanted: &Part,
    ) -> Result<(), ReconcileError> {
        let stock_failure = || ReconcileError::StockResolutionFailure {
            station,
            part_type: wanted.part_type.clone(),
            slot,
        };

        // The snapshot is pulled fresh for every lookup.
        if let Err(e) = self.cell.stock.refresh().await {
            warn!("Inventory refresh failed: {:#}", e);
            return Err(stock_failure());
        }
        let source = match self.cell.stock.resolve(&wanted.part_type).await {
            Ok(Some(part)) => part,
            Ok(None) => {
                warn!("Could not find {} in inventory", wanted.part_type);
                return Err(stock_failure());
            }
            Err(e) => {
                warn!("Inventory lookup for {} failed: {:#}", wanted.part_type, e);
                return Err(stock_failure());
            }
        };
        info!("Found {} at {}", source.part_type, source.location);

        let source = &source;
        let actuator = &self.cell.actuator;
        if let Err(e) = actuator.plan_pick_and_place(source, wanted).await {
            warn!("Could not compute key pick and place poses: {:#}", e);
        }

        self.act(station, Action::PickFromStock, move || {
            actuator.pick_from_stock(source)
        })
        .await?;

        if let Err(err) = self
            .act(station, Action::MoveToApproach, move || {
                actuator.move_to_approach_pose(wanted)
            })
            .await
        {
            // Do not leave the part hanging in the gripper.
            if let Err(e) = actuator.discard(wanted).await {
                warn!("Could not discard stranded part: {:#}", e);
            }
            return Err(err);
        }

        self.act(station, Action::PlaceNoRelease, move || {
            actuator.place_no_release(wanted)
        })
        .await?;
        self.act(station, Action::ReleaseAndRetract, move || {
            actuator.release_and_retract()
        })
        .await
    }

    /// Run one actuator call, retrying up to `actuation_retries` extra times.
    async fn act<F, Fut>(
        &self,
        station: Station,
        action: Action,
        mut call: F,
    ) -> Result<(), ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(()) => {
                    debug!("{} ok", action);
                    return Ok(());
                }
                Err(e) if attempt < self.settings.actuation_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed (attempt {}/{}): {:#}",
                        action,
                        attempt,
                        self.settings.actuation_retries + 1,
                        e
                    );
                }
                Err(e) => {
                    return Err(ReconcileError::ActuationFailure {
                        station,
                        action,
                        message: format!("{:#}", e),
                    });
                }
            }
        }
    }

    async fn emit(&self, event: EngineEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Pick the one correction to perform for `observation`: the first entry of
/// the highest-priority non-empty set. `None` means nothing is left to do.
pub fn select_correction(
    observation: &Observation,
    manifest: &Manifest,
    station: Station,
) -> Result<Option<Correction>, ReconcileError> {
    let slot_of = |slot: usize| {
        manifest
            .slot(slot)
            .cloned()
            .ok_or_else(|| ReconcileError::PerceptionUnavailable {
                station,
                message: format!(
                    "inspection referenced slot {} of a {}-slot manifest",
                    slot,
                    manifest.len()
                ),
            })
    };

    for stage in Stage::ALL {
        let correction = match stage {
            Stage::RemoveDefective => observation
                .defective
                .clone()
                .map(|part| Correction::RemoveDefective { part }),
            Stage::RemoveOrphans => observation
                .orphaned
                .first()
                .cloned()
                .map(|part| Correction::RemoveOrphan { part }),
            Stage::RepositionMisplaced => match observation.misplaced.first() {
                Some(entry) => Some(Correction::Reposition {
                    from: entry.observed.clone(),
                    to: slot_of(entry.slot)?,
                    slot: entry.slot,
                }),
                None => None,
            },
            Stage::ReplenishMissing => match observation.missing.first() {
                Some(&slot) => Some(Correction::Replenish {
                    slot,
                    wanted: slot_of(slot)?,
                }),
                None => None,
            },
        };
        if correction.is_some() {
            return Ok(correction);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::scripted::{Call, ScriptedCell};
    use crate::model::{Location, Pose, SlotMatch};

    fn slot_part(part_type: &str, x: f64) -> Part {
        Part::new(part_type, Pose::at(x, 0.0, 0.0), Location::Container(Station::Q1))
    }

    fn manifest(types: &[&str]) -> Manifest {
        Manifest::new(
            Station::Q1,
            types
                .iter()
                .enumerate()
                .map(|(i, t)| slot_part(t, i as f64 * 0.1))
                .collect(),
        )
    }

    fn stock_part(part_type: &str) -> Part {
        Part::new(part_type, Pose::at(-1.0, 0.5, 0.7), Location::Bin(3))
    }

    fn engine(cell: &Arc<ScriptedCell>, settings: ReconcileSettings) -> ReconcileEngine {
        ReconcileEngine::new(cell.as_cell(), settings)
    }

    fn missing(slots: Vec<usize>) -> Observation {
        Observation {
            missing: slots,
            ..Default::default()
        }
    }

    fn orphans(parts: Vec<Part>) -> Observation {
        Observation {
            orphaned: parts,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scenario_a_replenishes_missing_slot() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![missing(vec![0]), Observation::default()]);
        cell.stock("part_a", stock_part("part_a"));

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        assert!(state.fully_converged);
        assert_eq!(state.corrections, 1);
        assert_eq!(state.inspections, 2);
        assert_eq!(
            cell.calls(),
            vec![
                Call::Inspect(Station::Q1),
                Call::Refresh,
                Call::Resolve("part_a".into()),
                Call::Plan,
                Call::PickFromStock("part_a".into()),
                Call::MoveToApproach("part_a".into()),
                Call::PlaceNoRelease("part_a".into()),
                Call::ReleaseAndRetract,
                Call::Inspect(Station::Q1),
            ]
        );
    }

    #[tokio::test]
    async fn test_scenario_b_orphan_removed_before_replenish() {
        let m = manifest(&["part_a"]);
        let part_z = slot_part("part_z", 0.4);
        let cell = ScriptedCell::with_observations(vec![
            Observation {
                orphaned: vec![part_z.clone()],
                missing: vec![0],
                ..Default::default()
            },
            missing(vec![0]),
            Observation::default(),
        ]);
        cell.stock("part_a", stock_part("part_a"));

        engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        let calls = cell.calls();
        assert_eq!(calls[1], Call::PickFromContainer("part_z".into()));
        assert_eq!(calls[2], Call::Discard("part_z".into()));
        assert_eq!(calls[3], Call::Inspect(Station::Q1));
        assert_eq!(calls[4], Call::Refresh);
    }

    #[tokio::test]
    async fn test_scenario_c_repositions_misplaced_part() {
        let m = manifest(&["part_a"]);
        let observed = Part::new(
            "part_a",
            Pose::at(0.3, 0.3, 0.0),
            Location::Container(Station::Q1),
        );
        let cell = ScriptedCell::with_observations(vec![
            Observation {
                misplaced: vec![SlotMatch {
                    observed: observed.clone(),
                    slot: 0,
                }],
                ..Default::default()
            },
            Observation::default(),
        ]);

        engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        assert_eq!(
            cell.calls(),
            vec![
                Call::Inspect(Station::Q1),
                Call::PickFromContainer("part_a".into()),
                Call::Reposition {
                    from: observed.pose,
                    to: m.slot(0).unwrap().pose,
                },
                Call::ReleaseAndRetract,
                Call::Inspect(Station::Q1),
            ]
        );
    }

    #[tokio::test]
    async fn test_scenario_d_unresolvable_stock_is_fatal() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![missing(vec![0])]);

        let err = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::StockResolutionFailure { ref part_type, slot: 0, .. }
                if part_type == "part_a"
        ));
        assert_eq!(cell.actuation_count(), 0);
    }

    #[tokio::test]
    async fn test_converged_container_needs_one_inspection_and_no_actions() {
        let m = manifest(&["part_a", "part_b"]);
        let cell = ScriptedCell::with_observations(vec![Observation::default()]);

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q2)
            .await
            .unwrap();

        assert_eq!(state.inspections, 1);
        assert_eq!(state.corrections, 0);
        assert_eq!(cell.calls(), vec![Call::Inspect(Station::Q2)]);
    }

    #[tokio::test]
    async fn test_defective_part_goes_first() {
        let m = manifest(&["part_a"]);
        let bad = slot_part("part_a", 0.0);
        let stray = slot_part("part_q", 0.2);
        let cell = ScriptedCell::with_observations(vec![
            Observation {
                defective: Some(bad.clone()),
                orphaned: vec![stray.clone()],
                ..Default::default()
            },
            Observation {
                orphaned: vec![stray],
                missing: vec![0],
                ..Default::default()
            },
            missing(vec![0]),
            Observation::default(),
        ]);
        cell.stock("part_a", stock_part("part_a"));

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        let calls = cell.calls();
        assert_eq!(calls[1], Call::PickFromContainer("part_a".into()));
        assert_eq!(calls[2], Call::Discard("part_a".into()));
        assert_eq!(calls[4], Call::PickFromContainer("part_q".into()));
        assert_eq!(state.corrections, 3);
    }

    #[tokio::test]
    async fn test_orphans_removed_one_at_a_time_with_reinspection() {
        let m = manifest(&[]);
        let a = slot_part("part_x", 0.1);
        let b = slot_part("part_y", 0.2);
        let cell = ScriptedCell::with_observations(vec![
            orphans(vec![a.clone(), b.clone()]),
            orphans(vec![b]),
            Observation::default(),
        ]);

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        assert_eq!(state.inspections, 3);
        assert_eq!(
            cell.calls(),
            vec![
                Call::Inspect(Station::Q1),
                Call::PickFromContainer("part_x".into()),
                Call::Discard("part_x".into()),
                Call::Inspect(Station::Q1),
                Call::PickFromContainer("part_y".into()),
                Call::Discard("part_y".into()),
                Call::Inspect(Station::Q1),
            ]
        );
    }

    #[tokio::test]
    async fn test_staged_mode_does_not_revisit_orphans_after_replenish() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![
            missing(vec![0]),
            orphans(vec![slot_part("part_z", 0.5)]),
        ]);
        cell.stock("part_a", stock_part("part_a"));

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        assert!(!state.fully_converged);
        assert_eq!(state.final_observation.orphaned.len(), 1);
        assert_eq!(state.corrections, 1);
    }

    #[tokio::test]
    async fn test_full_mode_restarts_cascade_until_clean() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![
            missing(vec![0]),
            orphans(vec![slot_part("part_z", 0.5)]),
            Observation::default(),
        ]);
        cell.stock("part_a", stock_part("part_a"));
        let settings = ReconcileSettings {
            convergence: ConvergenceMode::Full,
            ..Default::default()
        };

        let state = engine(&cell, settings).reconcile(&m, Station::Q1).await.unwrap();

        assert!(state.fully_converged);
        assert_eq!(state.corrections, 2);
        assert!(cell.calls().contains(&Call::Discard("part_z".into())));
    }

    #[tokio::test]
    async fn test_approach_failure_discards_grasped_part_then_fails() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![missing(vec![0])]);
        cell.stock("part_a", stock_part("part_a"));
        cell.fail(Action::MoveToApproach, u32::MAX);

        let err = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::ActuationFailure {
                action: Action::MoveToApproach,
                ..
            }
        ));
        let calls = cell.calls();
        assert_eq!(calls.last(), Some(&Call::Discard("part_a".into())));
        assert!(!calls.iter().any(|c| matches!(c, Call::PlaceNoRelease(_))));
    }

    #[tokio::test]
    async fn test_pick_failure_is_fatal_without_retries() {
        let m = manifest(&[]);
        let cell = ScriptedCell::with_observations(vec![orphans(vec![slot_part("part_z", 0.1)])]);
        cell.fail(Action::PickFromContainer, 1);

        let err = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::ActuationFailure {
                action: Action::PickFromContainer,
                station: Station::Q1,
                ..
            }
        ));
        assert_eq!(cell.count(|c| matches!(c, Call::Inspect(_))), 1);
    }

    #[tokio::test]
    async fn test_actuation_retries_absorb_transient_failure() {
        let m = manifest(&[]);
        let cell = ScriptedCell::with_observations(vec![
            orphans(vec![slot_part("part_z", 0.1)]),
            Observation::default(),
        ]);
        cell.fail(Action::PickFromContainer, 1);
        let settings = ReconcileSettings {
            actuation_retries: 2,
            ..Default::default()
        };

        let state = engine(&cell, settings).reconcile(&m, Station::Q1).await.unwrap();

        assert_eq!(state.corrections, 1);
        assert_eq!(
            cell.count(|c| matches!(c, Call::PickFromContainer(_))),
            2
        );
    }

    #[tokio::test]
    async fn test_plan_failure_only_warns() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![missing(vec![0]), Observation::default()]);
        cell.stock("part_a", stock_part("part_a"));
        cell.fail_planning();

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();
        assert!(state.fully_converged);
    }

    #[tokio::test]
    async fn test_inspection_fault_is_perception_unavailable() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![]);
        cell.fail_inspection();

        let err = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::PerceptionUnavailable {
                station: Station::Q2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_declined_correction_aborts() {
        struct Decline;

        #[async_trait::async_trait]
        impl ActionGate for Decline {
            async fn confirm(&self, _: Station, _: &Correction) -> anyhow::Result<bool> {
                Ok(false)
            }
        }

        let m = manifest(&[]);
        let cell = ScriptedCell::with_observations(vec![orphans(vec![slot_part("part_z", 0.1)])]);
        let err = engine(&cell, ReconcileSettings::default())
            .with_gate(Arc::new(Decline))
            .reconcile(&m, Station::Q1)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Declined { .. }));
        assert_eq!(cell.actuation_count(), 0);
    }

    #[tokio::test]
    async fn test_events_show_one_inspection_between_corrections() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![
            Observation {
                orphaned: vec![slot_part("part_z", 0.3)],
                missing: vec![0],
                ..Default::default()
            },
            missing(vec![0]),
            Observation::default(),
        ]);
        cell.stock("part_a", stock_part("part_a"));
        let (tx, mut rx) = mpsc::channel(64);

        engine(&cell, ReconcileSettings::default())
            .with_event_channel(tx)
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                EngineEvent::Inspected { .. } => "inspect",
                EngineEvent::Correcting { .. } => "correct",
                EngineEvent::Converged { .. } => "done",
                EngineEvent::Failed { .. } => "failed",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["inspect", "correct", "inspect", "correct", "inspect", "done"]
        );
    }

    #[tokio::test]
    async fn test_staged_mode_removes_new_orphan_before_replenishing() {
        let m = manifest(&["part_a"]);
        let observed = Part::new(
            "part_a",
            Pose::at(0.3, 0.3, 0.0),
            Location::Container(Station::Q1),
        );
        let cell = ScriptedCell::with_observations(vec![
            Observation {
                misplaced: vec![SlotMatch { observed, slot: 0 }],
                ..Default::default()
            },
            Observation {
                orphaned: vec![slot_part("part_z", 0.5)],
                missing: vec![0],
                ..Default::default()
            },
            missing(vec![0]),
            Observation::default(),
        ]);
        cell.stock("part_a", stock_part("part_a"));

        let state = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        let calls = cell.calls();
        let discard = calls
            .iter()
            .position(|c| *c == Call::Discard("part_z".into()))
            .expect("orphan must be discarded");
        let refresh = calls
            .iter()
            .position(|c| *c == Call::Refresh)
            .expect("slot must be replenished");
        assert!(discard < refresh);
        assert_eq!(calls[discard + 1], Call::Inspect(Station::Q1));
        assert_eq!(state.corrections, 3);
        assert!(state.fully_converged);
    }

    #[tokio::test]
    async fn test_staged_mode_keeps_defective_first_after_reposition() {
        let m = manifest(&["part_a", "part_b"]);
        let observed = Part::new(
            "part_a",
            Pose::at(0.3, 0.3, 0.0),
            Location::Container(Station::Q1),
        );
        let bad = slot_part("part_b", 0.1);
        let cell = ScriptedCell::with_observations(vec![
            Observation {
                misplaced: vec![SlotMatch { observed, slot: 0 }],
                ..Default::default()
            },
            Observation {
                defective: Some(bad.clone()),
                satisfied: vec![SlotMatch {
                    observed: bad,
                    slot: 1,
                }],
                ..Default::default()
            },
            Observation::default(),
        ]);

        engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap();

        assert!(cell.calls().contains(&Call::Discard("part_b".into())));
    }

    #[tokio::test]
    async fn test_stock_pick_failure_is_fatal() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![missing(vec![0])]);
        cell.stock("part_a", stock_part("part_a"));
        cell.fail(Action::PickFromStock, 1);

        let err = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::ActuationFailure {
                action: Action::PickFromStock,
                ..
            }
        ));
        assert_eq!(cell.count(|c| *c == Call::ReleaseAndRetract), 0);
        assert_eq!(cell.count(|c| matches!(c, Call::Inspect(_))), 1);
        assert_eq!(
            cell.calls().last(),
            Some(&Call::PickFromStock("part_a".into()))
        );
    }

    #[tokio::test]
    async fn test_place_failure_is_fatal() {
        let m = manifest(&["part_a"]);
        let cell = ScriptedCell::with_observations(vec![missing(vec![0])]);
        cell.stock("part_a", stock_part("part_a"));
        cell.fail(Action::PlaceNoRelease, 1);

        let err = engine(&cell, ReconcileSettings::default())
            .reconcile(&m, Station::Q1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::ActuationFailure {
                action: Action::PlaceNoRelease,
                ..
            }
        ));
        assert_eq!(cell.count(|c| *c == Call::ReleaseAndRetract), 0);
        assert_eq!(cell.count(|c| matches!(c, Call::Inspect(_))), 1);
        assert_eq!(
            cell.calls().last(),
            Some(&Call::PlaceNoRelease("part_a".into()))
        );
    }

    #[test]
    fn test_select_rejects_out_of_range_slot() {
        let m = manifest(&["part_a"]);
        let obs = missing(vec![4]);
        let err = select_correction(&obs, &m, Station::Q1).unwrap_err();
        assert!(err.to_string().contains("slot 4"));
    }

    #[test]
    fn test_select_follows_priority_order() {
        let m = manifest(&["part_a", "part_b"]);
        let mut obs = Observation {
            defective: Some(slot_part("part_b", 0.1)),
            orphaned: vec![slot_part("part_z", 0.3)],
            misplaced: vec![SlotMatch {
                observed: slot_part("part_a", 0.4),
                slot: 0,
            }],
            missing: vec![1],
            ..Default::default()
        };

        let mut stages = Vec::new();
        while let Some(correction) = select_correction(&obs, &m, Station::Q1).unwrap() {
            stages.push(correction.stage());
            match correction.stage() {
                Stage::RemoveDefective => obs.defective = None,
                Stage::RemoveOrphans => obs.orphaned.clear(),
                Stage::RepositionMisplaced => obs.misplaced.clear(),
                Stage::ReplenishMissing => obs.missing.clear(),
            }
        }
        assert_eq!(stages, Stage::ALL.to_vec());
    }
}
