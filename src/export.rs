//! Fractional photon-energy maps
//!
//! Reads a finished SQLite run and writes one CSV row per event:
//!
//! ```text
//! Cell_0, ..., Cell_{n²-1}, x_true, y_true
//! ```
//!
//! `Cell_k` is the share of the event's optical-photon boundary energy that
//! left cell `k` of the first plane. `x_true`/`y_true` are the mean pre-step
//! position (cm) of the primary. Only events with photon energy in the first
//! plane produce a row.

use crate::pipeline::types::OPTICAL_PHOTON;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cells per plane must be positive")]
    NoCells,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub events: usize,
    pub cells: u32,
}

pub fn export_fractional_energy(
    db_path: impl AsRef<Path>,
    csv_path: impl AsRef<Path>,
    cells_per_plane: u32,
) -> Result<ExportSummary, ExportError> {
    if cells_per_plane == 0 {
        return Err(ExportError::NoCells);
    }

    let conn = Connection::open_with_flags(db_path.as_ref(), OpenFlags::SQLITE_OPEN_READ_WRITE)?;

    let mut maps: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT event_id, cell_id, SUM(energy_mev)
             FROM spectrum_data
             WHERE particle_name = ?1 AND cell_id >= 0 AND cell_id < ?2
             GROUP BY event_id, cell_id
             ORDER BY event_id, cell_id",
        )?;
        let rows = stmt.query_map(params![OPTICAL_PHOTON, cells_per_plane as i64], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?))
        })?;

        for row in rows {
            let (event_id, cell_id, energy) = row?;
            let cells = maps
                .entry(event_id)
                .or_insert_with(|| vec![0.0; cells_per_plane as usize]);
            cells[cell_id as usize] = energy;
        }
    }

    let mut positions: HashMap<i32, (f64, f64)> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT event_id, AVG(pre_x_cm), AVG(pre_y_cm)
             FROM muon_track_data
             GROUP BY event_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
        })?;
        for row in rows {
            let (event_id, x, y) = row?;
            positions.insert(event_id, (x, y));
        }
    }

    let path = csv_path.as_ref().to_path_buf();
    let mut out = BufWriter::new(File::create(&path)?);

    let header: Vec<String> = (0..cells_per_plane).map(|k| format!("Cell_{}", k)).collect();
    writeln!(out, "{},x_true,y_true", header.join(","))?;

    for (event_id, cells) in &maps {
        let total: f64 = cells.iter().sum();
        let mut fields: Vec<String> = cells
            .iter()
            .map(|e| format!("{:.6}", if total > 0.0 { e / total } else { 0.0 }))
            .collect();
        let (x, y) = positions.get(event_id).copied().unwrap_or((0.0, 0.0));
        fields.push(format!("{:.6}", x));
        fields.push(format!("{:.6}", y));
        writeln!(out, "{}", fields.join(","))?;
    }
    out.flush()?;

    log::info!("✅ Exported {} events to {}", maps.len(), path.display());

    Ok(ExportSummary {
        path,
        events: maps.len(),
        cells: cells_per_plane,
    })
}
