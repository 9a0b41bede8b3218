//! Sharded run: several worker contexts, one sink
//!
//! Each worker owns an event source, a classifier, an event context and an
//! energy accumulator. Rows and event boundaries travel over a bounded mpsc
//! channel to a single sink task, which appends the rows of one step as a
//! unit and applies the flush policy at every event boundary. Joining the
//! workers is the merge barrier for the run accumulators.

use super::classifier::StepClassifier;
use super::scheduler::FlushPolicy;
use super::schema::SchemaHandle;
use super::state::{EnergyAccumulator, EventContext, RunAggregator, RunReport};
use super::types::FieldValue;
use super::engine::EventSource;
use crate::error::{RunError, RunResult};
use crate::geometry::DetectorLayout;
use crate::sink::{RecordSink, SinkError};
use std::sync::Arc;
use tokio::sync::mpsc;

pub enum SinkMessage {
    /// Rows produced by one step
    Rows(Vec<(SchemaHandle, Vec<FieldValue>)>),
    /// All steps of `event_id` have been sent
    EventEnd { event_id: i32 },
}

/// What one worker contributes to the run.
#[derive(Debug, Clone)]
pub struct ShardOutcome {
    pub worker: usize,
    pub events: u64,
    pub accumulator: EnergyAccumulator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub flushes: u64,
    pub rows_written: u64,
}

#[derive(Debug, Clone)]
pub struct ShardedRunSummary {
    pub report: RunReport,
    pub sink: SinkStats,
    pub shards: Vec<ShardOutcome>,
}

#[derive(Debug, Clone)]
pub struct ShardOptions {
    pub run_id: u32,
    pub primary_particle: String,
    pub channel_buffer: usize,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            run_id: 0,
            primary_particle: "mu-".to_string(),
            channel_buffer: 10_000,
        }
    }
}

/// Sink loop. Runs until every sender is dropped, then closes the sink.
pub fn drain_sink_channel(
    mut rx: mpsc::Receiver<SinkMessage>,
    mut sink: Box<dyn RecordSink>,
    policy: Box<dyn FlushPolicy>,
) -> Result<SinkStats, SinkError> {
    let mut stats = SinkStats::default();

    while let Some(message) = rx.blocking_recv() {
        match message {
            SinkMessage::Rows(rows) => {
                for (handle, row) in rows {
                    sink.append_row(handle, row)?;
                }
            }
            SinkMessage::EventEnd { event_id } => {
                let buffered = sink.buffered_rows();
                if let Some(reason) = policy.flush_reason(event_id, buffered) {
                    sink.flush()?;
                    stats.flushes += 1;
                    log::info!(
                        "💾 Event {}: flushed {} rows to disk ({})",
                        event_id,
                        buffered,
                        reason
                    );
                }
            }
        }
    }

    log::info!("🔄 Performing final flush...");
    sink.close()?;
    stats.rows_written = sink.rows_written();
    log::info!("✅ Final flush complete ({} rows)", stats.rows_written);
    Ok(stats)
}

/// Worker loop: classify every event of `source` and forward the rows.
pub fn run_worker<L, S>(
    worker: usize,
    layout: &L,
    run: &RunAggregator,
    mut source: S,
    primary_particle: &str,
    tx: &mpsc::Sender<SinkMessage>,
) -> RunResult<ShardOutcome>
where
    L: DetectorLayout + ?Sized,
    S: EventSource,
{
    let mut classifier = StepClassifier::new(primary_particle);
    let mut accumulator = EnergyAccumulator::default();
    let schemas = run.schemas()?;
    let mut events = 0u64;

    let send = |message: SinkMessage| {
        tx.blocking_send(message).map_err(|_| {
            RunError::Integrity(format!("worker {}: sink channel closed", worker))
        })
    };

    while let Some(event) = source.next_event() {
        let mut ctx = EventContext::begin(event.event_id);

        for step in &event.steps {
            let records = classifier.classify(step, &mut ctx, layout, run)?;
            if records.is_empty() {
                continue;
            }
            let rows = records
                .into_iter()
                .map(|record| record.into_row(&schemas))
                .collect();
            send(SinkMessage::Rows(rows))?;
        }

        let summary = ctx.finish();
        accumulator.add_event_energy(summary.edep_mev);
        events += 1;
        send(SinkMessage::EventEnd {
            event_id: summary.event_id,
        })?;
    }

    log::info!("✅ Worker {} finished: {} events", worker, events);
    Ok(ShardOutcome {
        worker,
        events,
        accumulator,
    })
}

/// Run every source on its own blocking worker and stream into one sink.
///
/// Sink failures are reported ahead of worker failures, since a dead sink
/// closes the channel and every worker then fails on send.
pub async fn run_sharded<L, S>(
    layout: Arc<L>,
    run: RunAggregator,
    sources: Vec<S>,
    sink: Box<dyn RecordSink>,
    policy: Box<dyn FlushPolicy>,
    options: ShardOptions,
) -> RunResult<ShardedRunSummary>
where
    L: DetectorLayout + 'static,
    S: EventSource + 'static,
{
    if options.channel_buffer == 0 {
        return Err(RunError::Configuration("channel buffer must be positive".into()));
    }

    log::info!("🚀 Starting sharded run {}", options.run_id);
    log::info!("   ├─ Workers: {}", sources.len());
    log::info!("   ├─ Channel buffer: {}", options.channel_buffer);
    log::info!("   └─ Flush policy: {}", policy.describe());

    let mut run = run;
    run.reset(options.run_id)?;
    let run = Arc::new(run);

    let (tx, rx) = mpsc::channel(options.channel_buffer);
    let sink_task = tokio::task::spawn_blocking(move || drain_sink_channel(rx, sink, policy));

    let mut handles = Vec::with_capacity(sources.len());
    for (worker, source) in sources.into_iter().enumerate() {
        let layout = Arc::clone(&layout);
        let run = Arc::clone(&run);
        let tx = tx.clone();
        let primary = options.primary_particle.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(worker, &*layout, &run, source, &primary, &tx)
        }));
    }
    drop(tx);

    let mut shards = Vec::with_capacity(handles.len());
    let mut worker_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(outcome)) => shards.push(outcome),
            Ok(Err(e)) => {
                log::error!("❌ Worker failed: {}", e);
                worker_error.get_or_insert(e);
            }
            Err(e) => {
                worker_error.get_or_insert(RunError::Integrity(format!("worker task failed: {}", e)));
            }
        }
    }

    let sink_stats = sink_task
        .await
        .map_err(|e| RunError::Integrity(format!("sink task failed: {}", e)))??;
    if let Some(e) = worker_error {
        return Err(e);
    }

    let mut run = Arc::try_unwrap(run).map_err(|_| {
        RunError::Integrity("run aggregator still shared after workers joined".into())
    })?;
    run.merge(shards.iter().map(|s| &s.accumulator))?;

    let events = shards.iter().map(|s| s.events).sum();
    let report = run.report(events)?;
    report.log();
    log::info!(
        "✅ Run {} complete: {} rows written, {} scheduled flushes",
        report.run_id,
        sink_stats.rows_written,
        sink_stats.flushes
    );

    Ok(ShardedRunSummary {
        report,
        sink: sink_stats,
        shards,
    })
}
