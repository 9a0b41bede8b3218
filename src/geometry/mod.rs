//! Detector geometry as seen by the record pipeline
//!
//! - `addressing` - pure `(plane, row, col)` ↔ `CellId` mapping
//! - `detector` - the segmented four-plane layout and its placement table

pub mod addressing;
pub mod detector;

pub use addressing::{CellAddress, CellAddressing, CellId};
pub use detector::{
    CellPlacement, DetectorGeometry, DetectorLayout, GeometryConfig, PlaneEnvelope, VolumeId,
};
