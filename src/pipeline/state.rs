//! Event-local and run-level state
//!
//! - `EventContext` - the energy deposited in the current event, fresh per event
//! - `EnergyAccumulator` - Σe and Σe² over per-event totals, one per context
//! - `RunAggregator` - schema ownership, run lifecycle, merge and report
//!
//! Accumulators are plain values owned by their context. The run aggregator
//! sums them once at run end, so no state is shared between contexts while
//! events are being processed.

use super::schema::{RecordSchemas, SchemaHandle, SchemaRegistry};
use super::types::RecordKind;
use crate::error::{RunError, RunResult};
use serde::{Deserialize, Serialize};

/// Energy deposited in the current event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    event_id: i32,
    edep_mev: f64,
}

/// Result of a finished event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventSummary {
    pub event_id: i32,
    pub edep_mev: f64,
}

impl EventContext {
    pub fn begin(event_id: i32) -> Self {
        Self {
            event_id,
            edep_mev: 0.0,
        }
    }

    pub fn event_id(&self) -> i32 {
        self.event_id
    }

    pub fn add_edep(&mut self, edep_mev: f64) {
        self.edep_mev += edep_mev;
    }

    pub fn edep_mev(&self) -> f64 {
        self.edep_mev
    }

    /// Consume the context at event end.
    pub fn finish(self) -> EventSummary {
        EventSummary {
            event_id: self.event_id,
            edep_mev: self.edep_mev,
        }
    }
}

/// Running sums over per-event energy totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyAccumulator {
    pub sum: f64,
    pub sum_sq: f64,
    pub events: u64,
}

impl EnergyAccumulator {
    pub fn add_event_energy(&mut self, edep_mev: f64) {
        self.sum += edep_mev;
        self.sum_sq += edep_mev * edep_mev;
        self.events += 1;
    }

    pub fn merge(&mut self, other: &EnergyAccumulator) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.events += other.events;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Merged,
}

/// End-of-run dose statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: u32,
    pub events: u64,
    pub total_mev: f64,
    pub mean_mev: f64,
    pub stddev_mev: f64,
}

impl RunReport {
    pub fn log(&self) {
        log::info!("--------------------End of Run------------------------");
        log::info!(" The run {} consists of {} events", self.run_id, self.events);
        log::info!(
            " Cumulated energy deposit per event in scoring volume: {:.4} MeV rms = {:.4} MeV",
            self.mean_mev,
            self.stddev_mev
        );
        log::info!("------------------------------------------------------");
    }
}

/// Owner of the run's schemas and the global accumulator.
#[derive(Debug)]
pub struct RunAggregator {
    registry: SchemaRegistry,
    schemas: RecordSchemas,
    global: EnergyAccumulator,
    phase: RunPhase,
    run_id: u32,
}

impl RunAggregator {
    /// Define the three record schemas and seal the registry.
    pub fn new() -> RunResult<Self> {
        let mut registry = SchemaRegistry::new();
        let schemas = RecordSchemas::define(&mut registry)?;
        registry.seal();

        Ok(Self {
            registry,
            schemas,
            global: EnergyAccumulator::default(),
            phase: RunPhase::Idle,
            run_id: 0,
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    pub fn global(&self) -> &EnergyAccumulator {
        &self.global
    }

    /// All three handles, once the run has started.
    pub fn schemas(&self) -> RunResult<RecordSchemas> {
        if self.phase == RunPhase::Idle {
            return Err(RunError::Integrity(
                "record schemas requested before run start".to_string(),
            ));
        }
        Ok(self.schemas)
    }

    pub fn schema_handle(&self, kind: RecordKind) -> RunResult<SchemaHandle> {
        Ok(self.schemas()?.handle(kind))
    }

    /// Run start: zero the global accumulator. Rejected while a run is open.
    pub fn reset(&mut self, run_id: u32) -> RunResult<()> {
        if self.phase == RunPhase::Running {
            return Err(RunError::Integrity(format!(
                "run {} started while run {} is still open",
                run_id, self.run_id
            )));
        }
        self.global.reset();
        self.run_id = run_id;
        self.phase = RunPhase::Running;
        log::info!("🚀 Run {} started", run_id);
        Ok(())
    }

    /// Fold per-context accumulators into the global one (run-end barrier).
    pub fn merge<'a, I>(&mut self, locals: I) -> RunResult<()>
    where
        I: IntoIterator<Item = &'a EnergyAccumulator>,
    {
        if self.phase != RunPhase::Running {
            return Err(RunError::Integrity(format!(
                "merge requires a running run (phase: {:?})",
                self.phase
            )));
        }

        for local in locals {
            self.global.merge(local);
        }
        self.phase = RunPhase::Merged;
        Ok(())
    }

    pub fn report(&self, n_events: u64) -> RunResult<RunReport> {
        if self.phase != RunPhase::Merged {
            return Err(RunError::Integrity(format!(
                "report requires merged accumulators (phase: {:?})",
                self.phase
            )));
        }

        if n_events == 0 {
            return Ok(RunReport {
                run_id: self.run_id,
                events: 0,
                total_mev: 0.0,
                mean_mev: 0.0,
                stddev_mev: 0.0,
            });
        }

        let n = n_events as f64;
        let mean = self.global.sum / n;
        let variance = (self.global.sum_sq / n - mean * mean).max(0.0);

        Ok(RunReport {
            run_id: self.run_id,
            events: n_events,
            total_mev: self.global.sum,
            mean_mev: mean,
            stddev_mev: variance.sqrt(),
        })
    }
}
