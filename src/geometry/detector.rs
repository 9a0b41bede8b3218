//! Segmented detector layout
//!
//! Four scintillator planes stacked along z, each split into `n × n` cells
//! that share one logical volume. The layout is the read-only view of the
//! geometry that the step classifier needs:
//!
//! - the identity of the scoring (cell) logical volume
//! - a validated mapping from placement copy number to `CellId`
//!
//! ```text
//!   z ↑   plane 0  (upper 1)  ── spacing ──
//!         plane 1  (upper 2)
//!             scanning gap
//!         plane 2  (lower 1)
//!         plane 3  (lower 2)  ── spacing ──
//! ```

use super::addressing::{CellAddressing, CellId};
use crate::error::GeometryError;
use crate::units::CM;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a logical volume. Two volumes match only if their ids match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId(u32);

impl VolumeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LV#{}", self.0)
    }
}

/// Geometry view consumed by the pipeline.
pub trait DetectorLayout: Send + Sync {
    /// Addressing scheme of the cells.
    fn addressing(&self) -> CellAddressing;

    /// Logical volume whose steps produce deposit and boundary records.
    fn scoring_volume(&self) -> Option<VolumeId>;

    /// Cell placed with `copy_number`, if that copy number is a cell placement.
    fn cell_for_copy_number(&self, copy_number: i32) -> Option<CellId>;
}

/// Construction parameters. Lengths in mm.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    pub plane_size: f64,
    pub thickness: f64,
    pub cells_per_side: u32,
    pub scanning_gap: f64,
    pub plane_spacing: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            plane_size: 50.0 * CM,
            thickness: 2.0 * CM,
            cells_per_side: 8,
            scanning_gap: 60.0 * CM,
            plane_spacing: 5.0 * CM,
        }
    }
}

/// Number of detector planes.
pub const PLANE_COUNT: u32 = 4;

/// Copy number of plane `p`'s envelope is `ENVELOPE_COPY_BASE + p`.
pub const ENVELOPE_COPY_BASE: i32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaneEnvelope {
    pub index: u32,
    pub copy_number: i32,
    pub volume: VolumeId,
    pub z_center: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellPlacement {
    pub cell: CellId,
    pub copy_number: i32,
    /// Centre in world coordinates (mm).
    pub center: [f64; 3],
}

/// Copy number → cell mapping, checked once when the geometry is built.
#[derive(Debug, Clone, Default)]
pub struct PlacementTable {
    placements: Vec<Option<CellPlacement>>,
}

impl PlacementTable {
    fn insert(&mut self, placement: CellPlacement) -> Result<(), GeometryError> {
        let index = usize::try_from(placement.copy_number).map_err(|_| {
            GeometryError::InvalidParameter(format!(
                "negative copy number {}",
                placement.copy_number
            ))
        })?;

        if index >= self.placements.len() {
            self.placements.resize(index + 1, None);
        }
        if self.placements[index].is_some() {
            return Err(GeometryError::DuplicateCopyNumber {
                copy_number: placement.copy_number,
            });
        }
        self.placements[index] = Some(placement);
        Ok(())
    }

    pub fn get(&self, copy_number: i32) -> Option<&CellPlacement> {
        let index = usize::try_from(copy_number).ok()?;
        self.placements.get(index)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.placements.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The reference tomography detector.
#[derive(Debug, Clone)]
pub struct DetectorGeometry {
    config: GeometryConfig,
    addressing: CellAddressing,
    world_volume: VolumeId,
    world_half_extent: [f64; 3],
    planes: Vec<PlaneEnvelope>,
    cell_volume: VolumeId,
    cell_width: f64,
    cell_depth: f64,
    placements: PlacementTable,
}

impl DetectorGeometry {
    /// Build the four planes and place every cell.
    ///
    /// Cells receive copy numbers in construction order (plane, row along y,
    /// column along x), and each copy number is checked against the
    /// addressing scheme so that copy number and `CellId` always agree.
    pub fn build(config: GeometryConfig) -> Result<Self, GeometryError> {
        for (name, value) in [
            ("plane_size", config.plane_size),
            ("thickness", config.thickness),
            ("scanning_gap", config.scanning_gap),
            ("plane_spacing", config.plane_spacing),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(GeometryError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let addressing = CellAddressing::new(PLANE_COUNT, config.cells_per_side)?;
        let n = config.cells_per_side;
        let cell_width = config.plane_size / n as f64;
        let cell_depth = config.plane_size / n as f64;

        let half_gap = config.scanning_gap / 2.0;
        let half_thick = config.thickness / 2.0;
        let z_centers = [
            half_gap + half_thick + config.plane_spacing,
            half_gap + half_thick,
            -half_gap - half_thick,
            -half_gap - half_thick - config.plane_spacing,
        ];

        let world_xy = config.plane_size + 40.0 * CM;
        let world_z = config.scanning_gap
            + 4.0 * config.thickness
            + 2.0 * config.plane_spacing
            + 60.0 * CM;

        // World is volume 0, envelopes 1..=4, the shared cell volume comes last.
        let world_volume = VolumeId(0);
        let planes: Vec<PlaneEnvelope> = z_centers
            .iter()
            .enumerate()
            .map(|(p, z)| PlaneEnvelope {
                index: p as u32,
                copy_number: ENVELOPE_COPY_BASE + p as i32,
                volume: VolumeId(1 + p as u32),
                z_center: *z,
            })
            .collect();
        let cell_volume = VolumeId(1 + PLANE_COUNT);

        let mut placements = PlacementTable::default();
        let mut next_copy_number: i32 = 0;
        let half_plane = config.plane_size / 2.0;

        for plane in &planes {
            for row in 0..n {
                for col in 0..n {
                    let cell = addressing.encode(plane.index, row, col)?;
                    if cell.as_i32() != next_copy_number {
                        return Err(GeometryError::InvalidParameter(format!(
                            "copy number {} does not match cell id {}",
                            next_copy_number, cell
                        )));
                    }

                    placements.insert(CellPlacement {
                        cell,
                        copy_number: next_copy_number,
                        center: [
                            -half_plane + cell_width / 2.0 + col as f64 * cell_width,
                            -half_plane + cell_depth / 2.0 + row as f64 * cell_depth,
                            plane.z_center,
                        ],
                    })?;
                    next_copy_number += 1;
                }
            }
        }

        Ok(Self {
            config,
            addressing,
            world_volume,
            world_half_extent: [world_xy / 2.0, world_xy / 2.0, world_z / 2.0],
            planes,
            cell_volume,
            cell_width,
            cell_depth,
            placements,
        })
    }

    pub fn reference() -> Result<Self, GeometryError> {
        Self::build(GeometryConfig::default())
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    pub fn world_volume(&self) -> VolumeId {
        self.world_volume
    }

    pub fn world_half_extent(&self) -> [f64; 3] {
        self.world_half_extent
    }

    pub fn cell_volume(&self) -> VolumeId {
        self.cell_volume
    }

    pub fn planes(&self) -> &[PlaneEnvelope] {
        &self.planes
    }

    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    pub fn cell_depth(&self) -> f64 {
        self.cell_depth
    }

    pub fn thickness(&self) -> f64 {
        self.config.thickness
    }

    pub fn placement(&self, cell: CellId) -> Option<&CellPlacement> {
        self.placements.get(cell.as_i32())
    }

    pub fn placements(&self) -> &PlacementTable {
        &self.placements
    }

    /// Cell containing `pos` (mm), boundaries included.
    pub fn locate(&self, pos: [f64; 3]) -> Option<CellId> {
        let half_plane = self.config.plane_size / 2.0;
        let half_thick = self.config.thickness / 2.0;
        if pos[0].abs() > half_plane || pos[1].abs() > half_plane {
            return None;
        }

        let plane = self
            .planes
            .iter()
            .find(|p| (pos[2] - p.z_center).abs() <= half_thick)?;

        let last = self.addressing.cells_per_side() - 1;
        let col = (((pos[0] + half_plane) / self.cell_width).floor() as u32).min(last);
        let row = (((pos[1] + half_plane) / self.cell_depth).floor() as u32).min(last);

        self.addressing.encode(plane.index, row, col).ok()
    }

    /// Print the geometry banner at run start.
    pub fn log_summary(&self) {
        log::info!("📐 Segmented tomography geometry");
        log::info!(
            "   ├─ Plane size: {:.1} cm x {:.1} cm",
            self.config.plane_size / CM,
            self.config.plane_size / CM
        );
        log::info!(
            "   ├─ Segmentation: {}x{} cells per plane",
            self.addressing.cells_per_side(),
            self.addressing.cells_per_side()
        );
        log::info!(
            "   ├─ Cell size: {:.2} cm x {:.2} cm x {:.2} cm",
            self.cell_width / CM,
            self.cell_depth / CM,
            self.config.thickness / CM
        );
        log::info!(
            "   └─ Planes: {} ({} cells total)",
            self.planes.len(),
            self.addressing.total_cells()
        );
    }
}

impl DetectorLayout for DetectorGeometry {
    fn addressing(&self) -> CellAddressing {
        self.addressing
    }

    fn scoring_volume(&self) -> Option<VolumeId> {
        Some(self.cell_volume)
    }

    fn cell_for_copy_number(&self, copy_number: i32) -> Option<CellId> {
        self.placements.get(copy_number).map(|p| p.cell)
    }
}
