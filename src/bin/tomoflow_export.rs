//! Fractional-energy export
//!
//! Usage:
//!   tomoflow_export [run.db] [energy_maps_with_labels.csv] [cells_per_side]

use dotenv::dotenv;
use log::{error, info};
use std::env;
use tomoflow::export::export_fractional_energy;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let db_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "tomography_output.db".to_string());
    let csv_path = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "energy_maps_with_labels.csv".to_string());
    let cells_per_side: u32 = match args.get(3) {
        Some(raw) => raw.parse()?,
        None => 8,
    };

    info!("📤 Exporting plane-0 photon maps");
    info!("   ├─ Database: {}", db_path);
    info!("   ├─ CSV: {}", csv_path);
    info!("   └─ Cells: {}x{}", cells_per_side, cells_per_side);

    match export_fractional_energy(&db_path, &csv_path, cells_per_side * cells_per_side) {
        Ok(summary) => {
            info!("✅ Data saved to {} ({} events)", summary.path.display(), summary.events);
            Ok(())
        }
        Err(e) => {
            error!("❌ Export failed: {}", e);
            Err(e.into())
        }
    }
}
