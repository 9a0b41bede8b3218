use crate::pipeline::config::ConfigError;
use crate::pipeline::schema::{SchemaError, SchemaHandle, SchemaRegistry};
use crate::pipeline::types::FieldValue;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use super::jsonl_writer::JsonlSink;
use super::sqlite_writer::SqliteSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Cannot open output {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Row rejected: {0}")]
    Schema(#[from] SchemaError),

    #[error("Sink is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Sqlite,
    Jsonl,
}

impl BackendType {
    pub fn extension(&self) -> &'static str {
        match self {
            BackendType::Sqlite => "db",
            BackendType::Jsonl => "jsonl",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendType::Sqlite => write!(f, "SQLite"),
            BackendType::Jsonl => write!(f, "JSONL"),
        }
    }
}

impl FromStr for BackendType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(BackendType::Sqlite),
            "jsonl" => Ok(BackendType::Jsonl),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown backend '{}' (expected sqlite or jsonl)",
                other
            ))),
        }
    }
}

/// Bounded-memory output channel for record rows.
pub trait RecordSink: Send {
    /// Validate and buffer one row. Never touches storage.
    fn append_row(&mut self, handle: SchemaHandle, row: Vec<FieldValue>) -> Result<(), SinkError>;

    /// Persist all buffered rows. A flush with nothing buffered is a no-op.
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Flush and release the output. Valid exactly once.
    fn close(&mut self) -> Result<(), SinkError>;

    fn buffered_rows(&self) -> usize;

    /// Rows persisted so far.
    fn rows_written(&self) -> u64;

    fn backend_type(&self) -> BackendType;

    fn output_path(&self) -> &Path;
}

/// `<base>.<ext>`, keeping any dots already in the base name.
pub fn output_path(base: impl AsRef<Path>, backend: BackendType) -> PathBuf {
    let mut name = OsString::from(base.as_ref().as_os_str());
    name.push(".");
    name.push(backend.extension());
    PathBuf::from(name)
}

pub fn open_sink(
    backend: BackendType,
    base: impl AsRef<Path>,
    registry: &SchemaRegistry,
) -> Result<Box<dyn RecordSink>, SinkError> {
    let path = output_path(base, backend);
    let sink: Box<dyn RecordSink> = match backend {
        BackendType::Sqlite => Box::new(SqliteSink::new(&path, registry)?),
        BackendType::Jsonl => Box::new(JsonlSink::new(&path, registry)?),
    };
    Ok(sink)
}

/// Create the parent directory of an output file.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| SinkError::Open {
                path: path.to_path_buf(),
                reason: format!("failed to create directory {}: {}", parent.display(), e),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_appends_extension() {
        assert_eq!(
            output_path("out/tomography_output", BackendType::Sqlite),
            PathBuf::from("out/tomography_output.db")
        );
        assert_eq!(
            output_path("run.v2", BackendType::Jsonl),
            PathBuf::from("run.v2.jsonl")
        );
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQLite".parse::<BackendType>().unwrap(), BackendType::Sqlite);
        assert_eq!("jsonl".parse::<BackendType>().unwrap(), BackendType::Jsonl);
        assert!("csv".parse::<BackendType>().is_err());
    }
}
