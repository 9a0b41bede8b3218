//! Core data types: transport steps in, typed records out
//!
//! Steps are produced by the transport engine (an external collaborator) and
//! consumed read-only. Records are what the classifier emits and what the
//! sink persists.

use super::schema::{RecordSchemas, SchemaHandle};
use crate::geometry::{CellId, VolumeId};
use crate::units::CM;
use serde::{Deserialize, Serialize};

/// Species name whose boundary records carry total energy.
pub const OPTICAL_PHOTON: &str = "opticalphoton";

/// Track id of the primary particle.
pub const PRIMARY_TRACK_ID: i32 = 1;

/// Why a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Step limited by a geometric boundary (the particle is leaving a volume)
    GeomBoundary,
    /// Step limited by a physics process
    PostStepProcess,
    /// Step limited by a continuous (along-step) process
    AlongStep,
    /// User or engine imposed limit
    UserLimit,
    Undefined,
}

/// Placement a step point sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTouch {
    /// Logical volume identity (compared by identity, never by name)
    pub logical_volume: VolumeId,
    /// Copy number of the innermost placement (depth 0)
    pub copy_number: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepPoint {
    /// Position in mm
    pub position: [f64; 3],
    /// `None` when the point lies outside every volume
    pub volume: Option<VolumeTouch>,
    pub status: StepStatus,
}

/// Track state after the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub track_id: i32,
    pub particle: String,
    /// Post-step kinetic energy (MeV)
    pub kinetic_energy: f64,
    /// Post-step total energy (MeV)
    pub total_energy: f64,
}

/// One discrete transport segment between two geometry-relevant points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub pre: StepPoint,
    pub post: StepPoint,
    pub track: TrackState,
    /// Total energy deposited along the step (MeV)
    pub energy_deposit: f64,
}

/// One simulated event as delivered by the engine: ordered steps of all tracks.
#[derive(Debug, Clone, Default)]
pub struct SimEvent {
    pub event_id: i32,
    pub steps: Vec<Step>,
}

/// The three record streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    EnergyDeposit,
    BoundaryCrossing,
    PrimaryTrajectory,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::EnergyDeposit,
        RecordKind::BoundaryCrossing,
        RecordKind::PrimaryTrajectory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::EnergyDeposit => "ENERGY_DEPOSIT",
            RecordKind::BoundaryCrossing => "BOUNDARY_CROSSING",
            RecordKind::PrimaryTrajectory => "PRIMARY_TRAJECTORY",
        }
    }
}

/// Record produced from a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepRecord {
    EnergyDeposit {
        event_id: i32,
        cell: CellId,
        edep_mev: f64,
    },
    BoundaryCrossing {
        event_id: i32,
        cell: CellId,
        particle: String,
        energy_mev: f64,
    },
    PrimaryTrajectory {
        event_id: i32,
        /// Pre-step position in cm
        pre_cm: [f64; 3],
        /// Post-step position in cm
        post_cm: [f64; 3],
    },
}

impl StepRecord {
    pub fn trajectory(event_id: i32, pre_mm: [f64; 3], post_mm: [f64; 3]) -> Self {
        StepRecord::PrimaryTrajectory {
            event_id,
            pre_cm: pre_mm.map(|v| v / CM),
            post_cm: post_mm.map(|v| v / CM),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            StepRecord::EnergyDeposit { .. } => RecordKind::EnergyDeposit,
            StepRecord::BoundaryCrossing { .. } => RecordKind::BoundaryCrossing,
            StepRecord::PrimaryTrajectory { .. } => RecordKind::PrimaryTrajectory,
        }
    }

    pub fn event_id(&self) -> i32 {
        match self {
            StepRecord::EnergyDeposit { event_id, .. }
            | StepRecord::BoundaryCrossing { event_id, .. }
            | StepRecord::PrimaryTrajectory { event_id, .. } => *event_id,
        }
    }

    /// Column values in schema order, paired with the schema they belong to.
    pub fn into_row(self, schemas: &RecordSchemas) -> (SchemaHandle, Vec<FieldValue>) {
        let handle = schemas.handle(self.kind());
        let row = match self {
            StepRecord::EnergyDeposit {
                event_id,
                cell,
                edep_mev,
            } => vec![
                FieldValue::Int32(event_id),
                FieldValue::Int32(cell.as_i32()),
                FieldValue::Float64(edep_mev),
            ],
            StepRecord::BoundaryCrossing {
                event_id,
                cell,
                particle,
                energy_mev,
            } => vec![
                FieldValue::Int32(event_id),
                FieldValue::Int32(cell.as_i32()),
                FieldValue::Text(particle),
                FieldValue::Float64(energy_mev),
            ],
            StepRecord::PrimaryTrajectory {
                event_id,
                pre_cm,
                post_cm,
            } => {
                let mut row = Vec::with_capacity(7);
                row.push(FieldValue::Int32(event_id));
                row.extend(pre_cm.iter().chain(post_cm.iter()).map(|v| FieldValue::Float64(*v)));
                row
            }
        };
        (handle, row)
    }
}

/// A single typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int32(i32),
    Float64(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            FieldValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::SchemaRegistry;

    #[test]
    fn test_trajectory_converts_to_cm() {
        let record = StepRecord::trajectory(3, [10.0, -25.0, 500.0], [12.0, -24.0, 380.0]);
        match record {
            StepRecord::PrimaryTrajectory {
                event_id,
                pre_cm,
                post_cm,
            } => {
                assert_eq!(event_id, 3);
                assert_eq!(pre_cm, [1.0, -2.5, 50.0]);
                assert_eq!(post_cm, [1.2, -2.4, 38.0]);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_rows_follow_schema_column_order() {
        let mut registry = SchemaRegistry::new();
        let schemas = RecordSchemas::define(&mut registry).unwrap();
        let cell = crate::geometry::CellAddressing::REFERENCE.encode(1, 2, 3).unwrap();

        let (handle, row) = StepRecord::BoundaryCrossing {
            event_id: 9,
            cell,
            particle: "e-".to_string(),
            energy_mev: 0.25,
        }
        .into_row(&schemas);

        assert_eq!(handle, schemas.spectrum);
        assert_eq!(row[0].as_i32(), Some(9));
        assert_eq!(row[1].as_i32(), Some(83));
        assert_eq!(row[2].as_text(), Some("e-"));
        assert_eq!(row[3].as_f64(), Some(0.25));
        registry.validate_row(handle, &row).unwrap();

        let (handle, row) = StepRecord::trajectory(9, [0.0; 3], [0.0, 0.0, -10.0]).into_row(&schemas);
        assert_eq!(handle, schemas.muon_track);
        assert_eq!(row.len(), 7);
        registry.validate_row(handle, &row).unwrap();
    }
}
