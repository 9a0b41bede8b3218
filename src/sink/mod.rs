//! Streaming record sink
//!
//! Rows are buffered in memory and persisted when the run driver asks for a
//! flush. Two backends share the `RecordSink` interface:
//!
//! - `sqlite_writer` - one table per schema in `<base>.db`
//! - `jsonl_writer` - one JSON object per row in `<base>.jsonl`

pub mod jsonl_writer;
pub mod sqlite_writer;
pub mod writer_backend;

pub use jsonl_writer::JsonlSink;
pub use sqlite_writer::SqliteSink;
pub use writer_backend::{open_sink, output_path, BackendType, RecordSink, SinkError};
