//! # Step-to-record pipeline
//!
//! Turns transport steps into typed record rows and drives them into a
//! bounded-memory sink.
//!
//! ## Data flow
//!
//! 1. The event source delivers one finished event at a time
//! 2. The step classifier emits records for each step (deposit, boundary, trajectory)
//! 3. Rows are validated against their schema and buffered in the sink
//! 4. At each event boundary the event energy is accumulated and the flush policy runs
//! 5. At run end accumulators are merged, the report is logged, the sink is closed
//!
//! ## Modules
//!
//! - `types` - steps in, records out
//! - `schema` - record schema registry
//! - `classifier` - Unbound/Bound step classifier
//! - `state` - event context, accumulators, run aggregator
//! - `scheduler` - flush policies
//! - `engine` - serial run driver
//! - `ingestion` - sharded run over a tokio channel
//! - `config` - environment configuration

pub mod classifier;
pub mod config;
pub mod engine;
pub mod ingestion;
pub mod scheduler;
pub mod schema;
pub mod state;
pub mod types;

pub use classifier::{Binding, ClassifierState, StepClassifier};
pub use config::{ConfigError, RunConfig};
pub use engine::{EventSource, RunDriver};
pub use ingestion::{run_sharded, ShardOptions, ShardedRunSummary};
pub use scheduler::{
    BufferedRowsThreshold, EventIndexSchedule, FlushPolicy, FlushPolicyKind, FlushReason,
};
pub use schema::{ColumnType, RecordSchemas, SchemaError, SchemaHandle, SchemaRegistry};
pub use state::{EnergyAccumulator, EventContext, RunAggregator, RunReport};
pub use types::{FieldValue, RecordKind, SimEvent, Step, StepPoint, StepRecord, StepStatus, TrackState, VolumeTouch};
