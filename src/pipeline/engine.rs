//! Serial run driver
//!
//! Feeds events from an `EventSource` through the classifier into the sink,
//! one step at a time, and applies the flush policy at each event boundary.
//! The lifecycle is strictly ordered:
//!
//! ```text
//! begin_run → (begin_event → process_step* → end_event)* → end_run
//! ```

use super::classifier::StepClassifier;
use super::config::RunConfig;
use super::scheduler::FlushPolicy;
use super::state::{EnergyAccumulator, EventContext, EventSummary, RunAggregator, RunReport};
use super::types::{SimEvent, Step};
use crate::error::{RunError, RunResult};
use crate::geometry::DetectorLayout;
use crate::sink::{open_sink, RecordSink};

/// The transport engine seen from the pipeline: a stream of finished events.
pub trait EventSource: Send {
    fn next_event(&mut self) -> Option<SimEvent>;
}

impl<I> EventSource for I
where
    I: Iterator<Item = SimEvent> + Send,
{
    fn next_event(&mut self) -> Option<SimEvent> {
        self.next()
    }
}

/// Single-context run: one classifier, one accumulator, one sink.
pub struct RunDriver<L: DetectorLayout> {
    layout: L,
    run: RunAggregator,
    classifier: StepClassifier,
    local: EnergyAccumulator,
    sink: Box<dyn RecordSink>,
    policy: Box<dyn FlushPolicy>,
    event: Option<EventContext>,
    events_processed: u64,
    flush_count: u64,
}

impl<L: DetectorLayout> RunDriver<L> {
    pub fn new(
        layout: L,
        run: RunAggregator,
        sink: Box<dyn RecordSink>,
        policy: Box<dyn FlushPolicy>,
        primary_particle: &str,
    ) -> Self {
        Self {
            layout,
            run,
            classifier: StepClassifier::new(primary_particle),
            local: EnergyAccumulator::default(),
            sink,
            policy,
            event: None,
            events_processed: 0,
            flush_count: 0,
        }
    }

    /// Define the run schemas and open the configured sink.
    pub fn open(layout: L, config: &RunConfig) -> RunResult<Self> {
        let run = RunAggregator::new()?;
        let sink = open_sink(config.backend, &config.output_base, run.registry())?;
        let policy = config.flush_policy.build();

        log::info!("🚀 Serial run driver ready");
        log::info!("   ├─ Output: {} ({})", sink.output_path().display(), sink.backend_type());
        log::info!("   └─ Flush policy: {}", policy.describe());

        Ok(Self::new(layout, run, sink, policy, &config.primary_particle))
    }

    pub fn begin_run(&mut self, run_id: u32) -> RunResult<()> {
        self.run.reset(run_id)?;
        self.local.reset();
        self.events_processed = 0;
        self.flush_count = 0;
        Ok(())
    }

    pub fn begin_event(&mut self, event_id: i32) -> RunResult<()> {
        if let Some(open) = &self.event {
            return Err(RunError::Integrity(format!(
                "event {} started while event {} is still open",
                event_id,
                open.event_id()
            )));
        }
        self.event = Some(EventContext::begin(event_id));
        Ok(())
    }

    /// Classify one step and buffer its records. Returns the number of records.
    pub fn process_step(&mut self, step: &Step) -> RunResult<usize> {
        let event = self
            .event
            .as_mut()
            .ok_or_else(|| RunError::Integrity("step received outside an event".into()))?;

        let records = self
            .classifier
            .classify(step, event, &self.layout, &self.run)?;
        let count = records.len();

        let schemas = self.run.schemas()?;
        for record in records {
            let (handle, row) = record.into_row(&schemas);
            self.sink.append_row(handle, row)?;
        }
        Ok(count)
    }

    /// Fold the event into the context accumulator and flush if scheduled.
    pub fn end_event(&mut self) -> RunResult<EventSummary> {
        let summary = self
            .event
            .take()
            .ok_or_else(|| RunError::Integrity("end of event without an open event".into()))?
            .finish();

        self.local.add_event_energy(summary.edep_mev);
        self.events_processed += 1;

        let buffered = self.sink.buffered_rows();
        if let Some(reason) = self.policy.flush_reason(summary.event_id, buffered) {
            self.sink.flush()?;
            self.flush_count += 1;
            log::info!(
                "💾 Event {}: flushed {} rows to disk ({})",
                summary.event_id,
                buffered,
                reason
            );
        }

        log::trace!("Event {} edep {:.4} MeV", summary.event_id, summary.edep_mev);
        Ok(summary)
    }

    pub fn process_event(&mut self, event: &SimEvent) -> RunResult<EventSummary> {
        self.begin_event(event.event_id)?;
        for step in &event.steps {
            self.process_step(step)?;
        }
        self.end_event()
    }

    /// Drain the source. Returns the number of events processed.
    pub fn run_source<S: EventSource + ?Sized>(&mut self, source: &mut S) -> RunResult<u64> {
        let mut processed = 0u64;
        while let Some(event) = source.next_event() {
            self.process_event(&event)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Merge, flush and close the sink, then report.
    pub fn end_run(&mut self) -> RunResult<RunReport> {
        if let Some(open) = &self.event {
            return Err(RunError::Integrity(format!(
                "run ended while event {} is still open",
                open.event_id()
            )));
        }

        self.run.merge([&self.local])?;
        let report = self.run.report(self.events_processed)?;

        self.sink.close()?;
        report.log();
        log::info!(
            "✅ Run {} complete: {} rows written, {} scheduled flushes",
            report.run_id,
            self.sink.rows_written(),
            self.flush_count
        );
        Ok(report)
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    pub fn classifier(&self) -> &StepClassifier {
        &self.classifier
    }

    pub fn run(&self) -> &RunAggregator {
        &self.run
    }

    pub fn sink(&self) -> &dyn RecordSink {
        self.sink.as_ref()
    }
}
