//! Step classifier
//!
//! Turns one transport step into zero or more typed records. The classifier
//! starts `Unbound` and resolves the scoring volume and the record schema
//! handles the first time it sees a step; afterwards the binding is reused
//! for every step of the run.

use super::schema::RecordSchemas;
use super::state::{EventContext, RunAggregator};
use super::types::{Step, StepRecord, StepStatus, OPTICAL_PHOTON, PRIMARY_TRACK_ID};
use crate::error::{RunError, RunResult};
use crate::geometry::{DetectorLayout, VolumeId};

/// Resources a bound classifier works with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding {
    pub scoring_volume: VolumeId,
    pub schemas: RecordSchemas,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifierState {
    Unbound,
    Bound(Binding),
}

#[derive(Debug, Clone)]
pub struct StepClassifier {
    state: ClassifierState,
    primary_particle: String,
}

impl StepClassifier {
    pub fn new(primary_particle: impl Into<String>) -> Self {
        Self {
            state: ClassifierState::Unbound,
            primary_particle: primary_particle.into(),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, ClassifierState::Bound(_))
    }

    pub fn binding(&self) -> Option<&Binding> {
        match &self.state {
            ClassifierState::Bound(binding) => Some(binding),
            ClassifierState::Unbound => None,
        }
    }

    pub fn primary_particle(&self) -> &str {
        &self.primary_particle
    }

    /// Resolve the scoring volume and schema handles, once.
    pub fn bind<L: DetectorLayout + ?Sized>(
        &mut self,
        layout: &L,
        run: &RunAggregator,
    ) -> RunResult<&Binding> {
        if let ClassifierState::Unbound = self.state {
            let scoring_volume = layout.scoring_volume().ok_or_else(|| {
                RunError::Configuration("scoring volume is not defined by the detector layout".into())
            })?;

            let schemas = run.schemas()?;
            for handle in schemas.all() {
                if !run.registry().contains(handle) {
                    return Err(RunError::Integrity(format!(
                        "schema handle {:?} is not registered",
                        handle
                    )));
                }
            }

            log::debug!("Step classifier bound to scoring volume {}", scoring_volume);
            self.state = ClassifierState::Bound(Binding {
                scoring_volume,
                schemas,
            });
        }

        match &self.state {
            ClassifierState::Bound(binding) => Ok(binding),
            ClassifierState::Unbound => Err(RunError::Integrity("classifier failed to bind".into())),
        }
    }

    /// Records emitted by one step, in emission order.
    ///
    /// Deposits in the scoring volume are also added to the event context.
    pub fn classify<L: DetectorLayout + ?Sized>(
        &mut self,
        step: &Step,
        event: &mut EventContext,
        layout: &L,
        run: &RunAggregator,
    ) -> RunResult<Vec<StepRecord>> {
        let binding = *self.bind(layout, run)?;
        let event_id = event.event_id();
        let mut records = Vec::new();

        let touch = match step.pre.volume {
            Some(touch) => touch,
            None => return Ok(records),
        };

        if touch.logical_volume == binding.scoring_volume {
            let cell = layout.cell_for_copy_number(touch.copy_number).ok_or_else(|| {
                RunError::Integrity(format!(
                    "copy number {} of the scoring volume has no cell",
                    touch.copy_number
                ))
            })?;

            if step.energy_deposit > 0.0 {
                event.add_edep(step.energy_deposit);
                records.push(StepRecord::EnergyDeposit {
                    event_id,
                    cell,
                    edep_mev: step.energy_deposit,
                });
            }

            if step.post.status == StepStatus::GeomBoundary {
                let energy_mev = if step.track.particle == OPTICAL_PHOTON {
                    step.track.total_energy
                } else {
                    step.track.kinetic_energy
                };
                records.push(StepRecord::BoundaryCrossing {
                    event_id,
                    cell,
                    particle: step.track.particle.clone(),
                    energy_mev,
                });
            }
        }

        if step.track.track_id == PRIMARY_TRACK_ID && step.track.particle == self.primary_particle {
            records.push(StepRecord::trajectory(
                event_id,
                step.pre.position,
                step.post.position,
            ));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CellAddressing, CellId, DetectorGeometry};
    use crate::pipeline::types::{StepPoint, TrackState, VolumeTouch};

    struct NoScoringVolume;

    impl DetectorLayout for NoScoringVolume {
        fn addressing(&self) -> CellAddressing {
            CellAddressing::REFERENCE
        }

        fn scoring_volume(&self) -> Option<VolumeId> {
            None
        }

        fn cell_for_copy_number(&self, _copy_number: i32) -> Option<CellId> {
            None
        }
    }

    fn create_test_step(
        volume: Option<VolumeTouch>,
        post_status: StepStatus,
        track_id: i32,
        particle: &str,
        edep: f64,
    ) -> Step {
        Step {
            pre: StepPoint {
                position: [10.0, 20.0, 365.0],
                volume,
                status: StepStatus::GeomBoundary,
            },
            post: StepPoint {
                position: [11.0, 21.0, 355.0],
                volume,
                status: post_status,
            },
            track: TrackState {
                track_id,
                particle: particle.to_string(),
                kinetic_energy: 0.0,
                total_energy: 2.1,
            },
            energy_deposit: edep,
        }
    }

    fn setup() -> (DetectorGeometry, RunAggregator) {
        let geometry = DetectorGeometry::reference().unwrap();
        let mut run = RunAggregator::new().unwrap();
        run.reset(0).unwrap();
        (geometry, run)
    }

    fn cell_touch(geometry: &DetectorGeometry, copy_number: i32) -> Option<VolumeTouch> {
        Some(VolumeTouch {
            logical_volume: geometry.cell_volume(),
            copy_number,
        })
    }

    #[test]
    fn test_deposits_sum_into_event() {
        // Test: deposits [1.5, 0, 2.5] in cell 5 give 4.0 and two deposit records
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(0);

        let mut deposits = 0;
        for edep in [1.5, 0.0, 2.5] {
            let step = create_test_step(
                cell_touch(&geometry, 5),
                StepStatus::PostStepProcess,
                3,
                "e-",
                edep,
            );
            let records = classifier.classify(&step, &mut event, &geometry, &run).unwrap();
            deposits += records
                .iter()
                .filter(|r| matches!(r, StepRecord::EnergyDeposit { .. }))
                .count();
        }

        assert_eq!(deposits, 2);
        assert_eq!(event.edep_mev(), 4.0);
    }

    #[test]
    fn test_optical_photon_boundary_uses_total_energy() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(12);

        let step = create_test_step(
            cell_touch(&geometry, 17),
            StepStatus::GeomBoundary,
            40,
            OPTICAL_PHOTON,
            0.0,
        );
        let records = classifier.classify(&step, &mut event, &geometry, &run).unwrap();

        assert_eq!(records.len(), 1);
        match &records[0] {
            StepRecord::BoundaryCrossing {
                event_id,
                cell,
                particle,
                energy_mev,
            } => {
                assert_eq!(*event_id, 12);
                assert_eq!(cell.get(), 17);
                assert_eq!(particle, OPTICAL_PHOTON);
                assert_eq!(*energy_mev, 2.1);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_other_species_boundary_uses_kinetic_energy() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(0);

        let mut step = create_test_step(
            cell_touch(&geometry, 3),
            StepStatus::GeomBoundary,
            2,
            "e-",
            0.0,
        );
        step.track.kinetic_energy = 0.75;
        let records = classifier.classify(&step, &mut event, &geometry, &run).unwrap();

        assert!(matches!(
            records.as_slice(),
            [StepRecord::BoundaryCrossing { energy_mev, .. }] if *energy_mev == 0.75
        ));
    }

    #[test]
    fn test_primary_emits_trajectory_outside_cells() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(4);

        let world = Some(VolumeTouch {
            logical_volume: geometry.world_volume(),
            copy_number: 0,
        });
        let step = create_test_step(world, StepStatus::GeomBoundary, 1, "mu-", 0.0);
        let records = classifier.classify(&step, &mut event, &geometry, &run).unwrap();

        assert_eq!(records.len(), 1);
        assert!(matches!(
            records[0],
            StepRecord::PrimaryTrajectory { event_id: 4, pre_cm, .. } if pre_cm == [1.0, 2.0, 36.5]
        ));

        // Same track id, different species: not the primary
        let step = create_test_step(world, StepStatus::GeomBoundary, 1, "e-", 0.0);
        assert!(classifier
            .classify(&step, &mut event, &geometry, &run)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_primary_in_cell_emits_all_three() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(0);

        let step = create_test_step(cell_touch(&geometry, 0), StepStatus::GeomBoundary, 1, "mu-", 3.9);
        let kinds: Vec<_> = classifier
            .classify(&step, &mut event, &geometry, &run)
            .unwrap()
            .iter()
            .map(|r| r.kind())
            .collect();

        assert_eq!(
            kinds,
            vec![
                crate::pipeline::types::RecordKind::EnergyDeposit,
                crate::pipeline::types::RecordKind::BoundaryCrossing,
                crate::pipeline::types::RecordKind::PrimaryTrajectory,
            ]
        );
    }

    #[test]
    fn test_step_without_volume_is_skipped() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(0);

        let step = create_test_step(None, StepStatus::GeomBoundary, 1, "mu-", 5.0);
        let records = classifier.classify(&step, &mut event, &geometry, &run).unwrap();
        assert!(records.is_empty());
        assert_eq!(event.edep_mev(), 0.0);
    }

    #[test]
    fn test_non_scoring_volume_emits_nothing() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(0);

        let envelope = Some(VolumeTouch {
            logical_volume: geometry.planes()[0].volume,
            copy_number: 1000,
        });
        let step = create_test_step(envelope, StepStatus::GeomBoundary, 5, "e-", 1.0);
        assert!(classifier
            .classify(&step, &mut event, &geometry, &run)
            .unwrap()
            .is_empty());
        assert_eq!(event.edep_mev(), 0.0);
    }

    #[test]
    fn test_unknown_copy_number_is_integrity_error() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let mut event = EventContext::begin(0);

        let step = create_test_step(cell_touch(&geometry, 999), StepStatus::GeomBoundary, 5, "e-", 1.0);
        let err = classifier
            .classify(&step, &mut event, &geometry, &run)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }

    #[test]
    fn test_binding_is_idempotent() {
        let (geometry, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        assert!(!classifier.is_bound());

        let first = *classifier.bind(&geometry, &run).unwrap();
        let second = *classifier.bind(&geometry, &run).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.scoring_volume, geometry.cell_volume());

        // A bound classifier does not consult the layout again
        let third = *classifier.bind(&NoScoringVolume, &run).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_missing_scoring_volume_is_configuration_error() {
        let (_, run) = setup();
        let mut classifier = StepClassifier::new("mu-");
        let err = classifier.bind(&NoScoringVolume, &run).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("scoring volume"));
    }

    #[test]
    fn test_bind_before_run_start_is_integrity_error() {
        let geometry = DetectorGeometry::reference().unwrap();
        let run = RunAggregator::new().unwrap();
        let mut classifier = StepClassifier::new("mu-");
        let err = classifier.bind(&geometry, &run).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }
}
