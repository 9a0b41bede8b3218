//! Error types for run-level operations
//!
//! Every fallible operation in the pipeline returns a `RunError`. The run
//! driver (or the binary) is the only place that decides to abort; nothing in
//! the library terminates the process.

use crate::pipeline::config::ConfigError;
use crate::pipeline::schema::SchemaError;
use crate::sink::writer_backend::SinkError;
use thiserror::Error;

/// Errors raised by the cell addressing scheme and the detector layout.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("cell address out of range: plane {plane}, row {row}, col {col} (planes: {planes}, cells per side: {cells_per_side})")]
    AddressOutOfRange {
        plane: u32,
        row: u32,
        col: u32,
        planes: u32,
        cells_per_side: u32,
    },

    #[error("cell id {id} out of range [0, {total})")]
    IdOutOfRange { id: u32, total: u32 },

    #[error("invalid geometry parameter: {0}")]
    InvalidParameter(String),

    #[error("placement copy number {copy_number} assigned twice")]
    DuplicateCopyNumber { copy_number: i32 },
}

/// Closed classification of fatal run errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The run was configured in a way that can never produce output.
    Configuration,
    /// Run bookkeeping is inconsistent (schemas, lifecycle, placements).
    Integrity,
    /// Persisting output failed (flush/close).
    Storage,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Configuration(_) | RunError::Config(_) => ErrorKind::Configuration,
            RunError::Geometry(GeometryError::InvalidParameter(_)) => ErrorKind::Configuration,
            RunError::Integrity(_) | RunError::Geometry(_) | RunError::Schema(_) => {
                ErrorKind::Integrity
            }
            RunError::Sink(SinkError::Open { .. }) => ErrorKind::Configuration,
            RunError::Sink(SinkError::Schema(_)) | RunError::Sink(SinkError::Closed) => {
                ErrorKind::Integrity
            }
            RunError::Sink(_) => ErrorKind::Storage,
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            RunError::Configuration("no scoring volume".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(RunError::Integrity("bad handle".into()).kind(), ErrorKind::Integrity);

        let open = RunError::from(SinkError::Open {
            path: PathBuf::from("/nope/out.db"),
            reason: "permission denied".into(),
        });
        assert_eq!(open.kind(), ErrorKind::Configuration);

        let io = RunError::from(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )));
        assert_eq!(io.kind(), ErrorKind::Storage);
        assert_eq!(RunError::from(SinkError::Closed).kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = RunError::from(GeometryError::IdOutOfRange { id: 300, total: 256 });
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("256"));
    }
}
