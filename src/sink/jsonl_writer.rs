//! JSON Lines record sink
//!
//! Appends one object per row to a single file; each flush syncs the file.

use crate::pipeline::schema::{SchemaHandle, SchemaRegistry};
use crate::pipeline::types::FieldValue;
use crate::sink::writer_backend::{ensure_parent_dir, BackendType, RecordSink, SinkError};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One JSON object per row: `{"table": "<schema>", "<column>": <value>, ...}`.
pub struct JsonlSink {
    file: Option<BufWriter<File>>,
    path: PathBuf,
    registry: SchemaRegistry,
    buffer: Vec<(SchemaHandle, Vec<FieldValue>)>,
    rows_written: u64,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>, registry: &SchemaRegistry) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;

        let file = File::create(&path).map_err(|e| SinkError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        log::info!("✅ JSONL output initialized: {}", path.display());

        Ok(Self {
            file: Some(BufWriter::new(file)),
            path,
            registry: registry.clone(),
            buffer: Vec::with_capacity(1024),
            rows_written: 0,
        })
    }

    fn write_buffer(&mut self) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        if self.buffer.is_empty() {
            return Ok(());
        }

        for (handle, row) in &self.buffer {
            let schema = self.registry.resolve(*handle)?;
            let mut object = Map::with_capacity(row.len() + 1);
            object.insert("table".to_string(), Value::String(schema.name.clone()));
            for (column, value) in schema.columns.iter().zip(row) {
                object.insert(column.name.clone(), serde_json::to_value(value)?);
            }

            let json = serde_json::to_string(&object)?;
            writeln!(file, "{}", json)?;
        }
        file.flush()?;
        file.get_ref().sync_data()?;

        log::debug!("✅ Flushed {} rows to JSONL", self.buffer.len());
        self.rows_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

impl RecordSink for JsonlSink {
    fn append_row(&mut self, handle: SchemaHandle, row: Vec<FieldValue>) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Err(SinkError::Closed);
        }
        self.registry.validate_row(handle, &row)?;
        self.buffer.push((handle, row));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.write_buffer()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.write_buffer()?;
        if let Some(file) = self.file.take() {
            file.into_inner()
                .map_err(|e| SinkError::Io(e.into_error()))?
                .sync_all()?;
        }
        log::info!("✅ Closed {} ({} rows)", self.path.display(), self.rows_written);
        Ok(())
    }

    fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Jsonl
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::RecordSchemas;
    use tempfile::tempdir;

    fn create_test_sink(path: &Path) -> (JsonlSink, RecordSchemas) {
        let mut registry = SchemaRegistry::new();
        let schemas = RecordSchemas::define(&mut registry).unwrap();
        registry.seal();
        (JsonlSink::new(path, &registry).unwrap(), schemas)
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_rows_written_on_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let (mut sink, schemas) = create_test_sink(&path);

        sink.append_row(
            schemas.spectrum,
            vec![
                FieldValue::Int32(4),
                FieldValue::Int32(12),
                FieldValue::Text("e-".into()),
                FieldValue::Float64(0.5),
            ],
        )
        .unwrap();
        assert!(read_lines(&path).is_empty());

        sink.flush().unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["table"], "spectrum_data");
        assert_eq!(lines[0]["event_id"], 4);
        assert_eq!(lines[0]["cell_id"], 12);
        assert_eq!(lines[0]["particle_name"], "e-");
        assert_eq!(lines[0]["energy_mev"], 0.5);
        sink.close().unwrap();
    }

    #[test]
    fn test_close_flushes_and_is_final() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let (mut sink, schemas) = create_test_sink(&path);

        let row = vec![
            FieldValue::Int32(0),
            FieldValue::Int32(1),
            FieldValue::Float64(0.25),
        ];
        sink.append_row(schemas.edep, row.clone()).unwrap();
        sink.close().unwrap();

        assert_eq!(read_lines(&path).len(), 1);
        assert_eq!(sink.rows_written(), 1);
        assert!(matches!(sink.close(), Err(SinkError::Closed)));
        assert!(matches!(sink.append_row(schemas.edep, row), Err(SinkError::Closed)));
    }

    #[test]
    fn test_unopenable_path_is_open_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut registry = SchemaRegistry::new();
        RecordSchemas::define(&mut registry).unwrap();
        let result = JsonlSink::new(blocker.join("run.jsonl"), &registry);
        assert!(matches!(result, Err(SinkError::Open { .. })));
    }
}
