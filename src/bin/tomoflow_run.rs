//! Run driver binary
//!
//! Generates `TOMOFLOW_EVENTS` synthetic muon events, classifies every step
//! and streams the records to `<TOMOFLOW_OUTPUT>.db` (or `.jsonl`). With
//! `TOMOFLOW_WORKERS` above 1 the events are split into contiguous blocks,
//! one blocking worker each, feeding a single sink task.
//!
//! Usage:
//!   cargo run --release --bin tomoflow_run -- [--backend sqlite|jsonl]
//!
//! Environment variables: see `tomoflow::pipeline::config`.

use chrono::{DateTime, Utc};
use dotenv::dotenv;
use log::{error, info};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use tomoflow::generator::{GunConfig, MuonGun};
use tomoflow::geometry::{DetectorGeometry, GeometryConfig};
use tomoflow::pipeline::{run_sharded, RunAggregator, RunConfig, RunDriver, RunReport, ShardOptions};
use tomoflow::sink::{open_sink, output_path, BackendType, RecordSink};
use tomoflow::{RunError, RunResult};

#[derive(Debug, Serialize)]
struct RunSummaryFile {
    generated_at: DateTime<Utc>,
    output: String,
    backend: BackendType,
    workers: usize,
    seed: u64,
    flush_policy: String,
    rows_written: u64,
    scheduled_flushes: u64,
    report: RunReport,
}

struct RunOutcome {
    report: RunReport,
    rows_written: u64,
    flushes: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 tomoflow run driver");

    let mut config = RunConfig::from_env()?;
    if let Some(backend) = RunConfig::parse_backend_from_args() {
        config.backend = backend;
    }

    info!("   ├─ Output: {}", output_path(&config.output_base, config.backend).display());
    info!("   ├─ Backend: {}", config.backend);
    info!("   ├─ Events: {}", config.events);
    info!("   ├─ Workers: {}", config.workers);
    info!("   ├─ Seed: {}", config.seed);
    info!("   └─ Primary: {}", config.primary_particle);

    let outcome = match execute(&config).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("❌ Run aborted ({:?}): {}", e.kind(), e);
            return Err(e.into());
        }
    };

    let summary_path = output_path(&config.output_base, config.backend).with_extension("summary.json");
    let summary = RunSummaryFile {
        generated_at: Utc::now(),
        output: output_path(&config.output_base, config.backend).display().to_string(),
        backend: config.backend,
        workers: config.workers,
        seed: config.seed,
        flush_policy: config.flush_policy.build().describe(),
        rows_written: outcome.rows_written,
        scheduled_flushes: outcome.flushes,
        report: outcome.report,
    };
    serde_json::to_writer_pretty(BufWriter::new(File::create(&summary_path)?), &summary)?;
    info!("📊 Summary written to {}", summary_path.display());

    Ok(())
}

async fn execute(config: &RunConfig) -> RunResult<RunOutcome> {
    let geometry = Arc::new(DetectorGeometry::build(GeometryConfig {
        cells_per_side: config.cells_per_side,
        ..GeometryConfig::default()
    })?);
    geometry.log_summary();

    let gun = GunConfig {
        particle: config.primary_particle.clone(),
        ..GunConfig::default()
    };
    let events = i32::try_from(config.events)
        .map_err(|_| RunError::Configuration(format!("too many events: {}", config.events)))?;

    if config.workers <= 1 {
        let mut driver = RunDriver::open((*geometry).clone(), config)?;
        let mut source = MuonGun::new(Arc::clone(&geometry), gun, config.seed, 0..events)?;

        driver.begin_run(0)?;
        driver.run_source(&mut source)?;
        let report = driver.end_run()?;

        return Ok(RunOutcome {
            report,
            rows_written: driver.sink().rows_written(),
            flushes: driver.flush_count(),
        });
    }

    let run = RunAggregator::new()?;
    let sink = open_sink(config.backend, &config.output_base, run.registry())?;
    let sources = MuonGun::sharded(Arc::clone(&geometry), &gun, config.seed, events, config.workers)?;

    let summary = run_sharded(
        geometry,
        run,
        sources,
        sink,
        config.flush_policy.build(),
        ShardOptions {
            run_id: 0,
            primary_particle: config.primary_particle.clone(),
            channel_buffer: config.channel_buffer,
        },
    )
    .await?;

    Ok(RunOutcome {
        report: summary.report,
        rows_written: summary.sink.rows_written,
        flushes: summary.sink.flushes,
    })
}
