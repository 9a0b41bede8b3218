//! End-to-end runs with the synthetic muon source
//!
//! - serial run into SQLite, checked against the run report
//! - sharded run into JSONL, checked against the serial run
//! - fractional-energy export of a finished run

#[cfg(test)]
mod run_pipeline_tests {
    use rusqlite::Connection;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tomoflow::export::export_fractional_energy;
    use tomoflow::generator::{GunConfig, MuonGun};
    use tomoflow::geometry::DetectorGeometry;
    use tomoflow::pipeline::{
        run_sharded, EventIndexSchedule, RunAggregator, RunConfig, RunDriver, RunReport,
        ShardOptions,
    };
    use tomoflow::sink::{open_sink, BackendType, RecordSink};

    const EVENTS: i32 = 120;
    const SEED: u64 = 2024;

    fn run_serial(base: &Path, backend: BackendType) -> (RunReport, u64, u64) {
        let geometry = Arc::new(DetectorGeometry::reference().unwrap());
        let config = RunConfig {
            output_base: base.to_path_buf(),
            backend,
            ..RunConfig::default()
        };

        let mut driver = RunDriver::open((*geometry).clone(), &config).unwrap();
        let mut source = MuonGun::new(geometry, GunConfig::default(), SEED, 0..EVENTS).unwrap();

        driver.begin_run(0).unwrap();
        assert_eq!(driver.run_source(&mut source).unwrap(), EVENTS as u64);
        let report = driver.end_run().unwrap();
        (report, driver.sink().rows_written(), driver.flush_count())
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_serial_run_into_sqlite() {
        // Test: every record stream is populated and agrees with the report
        let dir = tempdir().unwrap();
        let base = dir.path().join("tomography_output");
        let (report, rows_written, flushes) = run_serial(&base, BackendType::Sqlite);

        assert_eq!(report.events, EVENTS as u64);
        assert!(report.mean_mev > 0.0);
        assert!(report.stddev_mev >= 0.0);
        // Events 50 and 100
        assert_eq!(flushes, 2);

        let conn = Connection::open(dir.path().join("tomography_output.db")).unwrap();
        let edep_rows = count(&conn, "SELECT COUNT(*) FROM edep_data");
        let spectrum_rows = count(&conn, "SELECT COUNT(*) FROM spectrum_data");
        let track_rows = count(&conn, "SELECT COUNT(*) FROM muon_track_data");
        assert!(edep_rows > 0);
        assert!(spectrum_rows > 0);
        assert_eq!((edep_rows + spectrum_rows + track_rows) as u64, rows_written);

        // Every event has a primary trajectory
        assert_eq!(
            count(&conn, "SELECT COUNT(DISTINCT event_id) FROM muon_track_data"),
            EVENTS as i64
        );

        // Cell ids stay inside the addressing range
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM edep_data WHERE cell_id < 0 OR cell_id >= 256"
            ),
            0
        );
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM edep_data WHERE edep_mev <= 0"), 0);

        let total: f64 = conn
            .query_row("SELECT SUM(edep_mev) FROM edep_data", [], |row| row.get(0))
            .unwrap();
        assert!((total - report.total_mev).abs() < 1e-6 * report.total_mev.max(1.0));

        // Photon boundary records carry eV-scale energies
        let max_photon: f64 = conn
            .query_row(
                "SELECT MAX(energy_mev) FROM spectrum_data WHERE particle_name = 'opticalphoton'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(max_photon < 4.0e-6);
    }

    #[tokio::test]
    async fn test_sharded_run_matches_serial() {
        let dir = tempdir().unwrap();
        let (serial, serial_rows, _) = run_serial(&dir.path().join("serial"), BackendType::Jsonl);

        let geometry = Arc::new(DetectorGeometry::reference().unwrap());
        let run = RunAggregator::new().unwrap();
        let sink = open_sink(BackendType::Jsonl, dir.path().join("sharded"), run.registry()).unwrap();
        let sources =
            MuonGun::sharded(Arc::clone(&geometry), &GunConfig::default(), SEED, EVENTS, 3).unwrap();

        let summary = run_sharded(
            geometry,
            run,
            sources,
            sink,
            Box::new(EventIndexSchedule::default()),
            ShardOptions {
                channel_buffer: 64,
                ..ShardOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.report.events, serial.events);
        assert!((summary.report.mean_mev - serial.mean_mev).abs() < 1e-9 * serial.mean_mev);
        assert!((summary.report.stddev_mev - serial.stddev_mev).abs() < 1e-6);
        assert_eq!(summary.sink.rows_written, serial_rows);
        assert_eq!(summary.sink.flushes, 2);

        let text = std::fs::read_to_string(dir.path().join("sharded.jsonl")).unwrap();
        assert_eq!(text.lines().count() as u64, serial_rows);
    }

    #[test]
    fn test_export_after_run() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("tomography_output");
        run_serial(&base, BackendType::Sqlite);

        let csv_path = dir.path().join("energy_maps_with_labels.csv");
        let summary =
            export_fractional_energy(dir.path().join("tomography_output.db"), &csv_path, 64).unwrap();
        assert!(summary.events > 0);
        assert!(summary.events <= EVENTS as usize);

        let text = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), 66);

        for line in lines {
            let values: Vec<f64> = line.split(',').map(|v| v.parse().unwrap()).collect();
            let fraction_sum: f64 = values[..64].iter().sum();
            assert!((fraction_sum - 1.0).abs() < 1e-4, "fractions sum to {}", fraction_sum);
            assert!(values[64].is_finite() && values[65].is_finite());
        }
    }
}
