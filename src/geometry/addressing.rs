//! Global cell addressing
//!
//! Maps `(plane, row, col)` to one global identifier and back:
//!
//! ```text
//! id = plane * n² + row * n + col
//! plane = id / n²,  row = (id % n²) / n,  col = id % n
//! ```
//!
//! Planes are numbered in construction order and cells are row-major inside a
//! plane. The identifier is the join key between the geometry and every record
//! stream, so it never changes during a run.

use crate::error::GeometryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable global identifier of one detector cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(u32);

impl CellId {
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Value as stored in 32-bit integer record columns.
    ///
    /// `CellAddressing::new` guarantees every valid id fits in `i32`.
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded position of a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub plane: u32,
    pub row: u32,
    pub col: u32,
}

/// Addressing scheme for `planes` planes of `n × n` cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellAddressing {
    planes: u32,
    cells_per_side: u32,
}

impl CellAddressing {
    /// 4 planes of 8 × 8 cells.
    pub const REFERENCE: CellAddressing = CellAddressing {
        planes: 4,
        cells_per_side: 8,
    };

    pub fn new(planes: u32, cells_per_side: u32) -> Result<Self, GeometryError> {
        if planes == 0 || cells_per_side == 0 {
            return Err(GeometryError::InvalidParameter(format!(
                "planes ({}) and cells per side ({}) must be positive",
                planes, cells_per_side
            )));
        }

        let total = cells_per_side
            .checked_mul(cells_per_side)
            .and_then(|per_plane| per_plane.checked_mul(planes))
            .filter(|total| *total <= i32::MAX as u32);

        if total.is_none() {
            return Err(GeometryError::InvalidParameter(format!(
                "{} planes of {}x{} cells overflow 32-bit cell ids",
                planes, cells_per_side, cells_per_side
            )));
        }

        Ok(Self {
            planes,
            cells_per_side,
        })
    }

    pub fn planes(&self) -> u32 {
        self.planes
    }

    pub fn cells_per_side(&self) -> u32 {
        self.cells_per_side
    }

    pub fn cells_per_plane(&self) -> u32 {
        self.cells_per_side * self.cells_per_side
    }

    pub fn total_cells(&self) -> u32 {
        self.cells_per_plane() * self.planes
    }

    pub fn encode(&self, plane: u32, row: u32, col: u32) -> Result<CellId, GeometryError> {
        if plane >= self.planes || row >= self.cells_per_side || col >= self.cells_per_side {
            return Err(GeometryError::AddressOutOfRange {
                plane,
                row,
                col,
                planes: self.planes,
                cells_per_side: self.cells_per_side,
            });
        }

        Ok(CellId(
            plane * self.cells_per_plane() + row * self.cells_per_side + col,
        ))
    }

    pub fn decode(&self, id: CellId) -> Result<CellAddress, GeometryError> {
        let total = self.total_cells();
        if id.0 >= total {
            return Err(GeometryError::IdOutOfRange { id: id.0, total });
        }

        let offset = id.0 % self.cells_per_plane();
        Ok(CellAddress {
            plane: id.0 / self.cells_per_plane(),
            row: offset / self.cells_per_side,
            col: offset % self.cells_per_side,
        })
    }

    /// Interpret a raw value (a placement copy number, a CSV column) as a cell id.
    pub fn cell_id(&self, raw: i64) -> Result<CellId, GeometryError> {
        let total = self.total_cells();
        match u32::try_from(raw) {
            Ok(id) if id < total => Ok(CellId(id)),
            _ => Err(GeometryError::IdOutOfRange {
                id: u32::try_from(raw).unwrap_or(u32::MAX),
                total,
            }),
        }
    }

    /// All cell addresses in construction order (plane, then row, then col).
    pub fn addresses(&self) -> impl Iterator<Item = CellAddress> + '_ {
        let n = self.cells_per_side;
        (0..self.planes).flat_map(move |plane| {
            (0..n).flat_map(move |row| (0..n).map(move |col| CellAddress { plane, row, col }))
        })
    }
}

impl Default for CellAddressing {
    fn default() -> Self {
        Self::REFERENCE
    }
}
