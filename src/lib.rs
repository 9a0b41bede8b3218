//! tomoflow: step-to-record aggregation for a segmented muon tomography detector
//!
//! - `geometry` - cell addressing and the four-plane detector layout
//! - `pipeline` - step classification, run accumulators, flush policies, run drivers
//! - `sink` - SQLite and JSONL record sinks
//! - `generator` - synthetic primary-muon event source
//! - `export` - fractional photon-energy CSV maps from a finished run

pub mod error;
pub mod export;
pub mod generator;
pub mod geometry;
pub mod pipeline;
pub mod sink;
pub mod sqlite_pragma;
pub mod units;

pub use error::{ErrorKind, GeometryError, RunError, RunResult};
