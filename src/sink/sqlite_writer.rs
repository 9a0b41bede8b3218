//! SQLite record sink
//!
//! One table per registered schema, created when the sink opens. Rows are
//! buffered in memory and written in a single transaction per flush.

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use crate::pipeline::schema::{SchemaError, SchemaHandle, SchemaRegistry};
use crate::pipeline::types::FieldValue;
use crate::sink::writer_backend::{ensure_parent_dir, BackendType, RecordSink, SinkError};
use crate::sqlite_pragma::apply_optimized_pragmas;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Int32(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            FieldValue::Float64(v) => ToSqlOutput::Owned(Value::Real(*v)),
            FieldValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

struct TableSpec {
    name: String,
    insert_sql: String,
}

/// One table per schema, rows inserted in a single transaction per flush.
pub struct SqliteSink {
    conn: Option<Connection>,
    path: PathBuf,
    registry: SchemaRegistry,
    tables: HashMap<SchemaHandle, TableSpec>,
    batch: Vec<(SchemaHandle, Vec<FieldValue>)>,
    rows_written: u64,
}

impl SqliteSink {
    /// Create `db_path`, replacing any previous file, with a table per schema.
    pub fn new(db_path: impl AsRef<Path>, registry: &SchemaRegistry) -> Result<Self, SinkError> {
        let path = db_path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;

        for suffix in ["", "-wal", "-shm"] {
            let mut stale = path.clone().into_os_string();
            stale.push(suffix);
            let stale = PathBuf::from(stale);
            if stale.exists() {
                std::fs::remove_file(&stale).map_err(|e| SinkError::Open {
                    path: path.clone(),
                    reason: format!("cannot replace existing file: {}", e),
                })?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| SinkError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        apply_optimized_pragmas(&conn)?;

        let mut tables = HashMap::new();
        for (handle, schema) in registry.iter() {
            let columns: Vec<String> = schema
                .columns
                .iter()
                .map(|c| format!("{} {} NOT NULL", c.name, c.ty.sql_type()))
                .collect();

            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        {}
                    )",
                    schema.name,
                    columns.join(",\n                        ")
                ),
                [],
            )?;

            if schema.columns.iter().any(|c| c.name == "event_id") {
                conn.execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS idx_{0}_event ON {0}(event_id)",
                        schema.name
                    ),
                    [],
                )?;
            }

            let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
            let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
            tables.insert(
                handle,
                TableSpec {
                    name: schema.name.clone(),
                    insert_sql: format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        schema.name,
                        names.join(", "),
                        placeholders.join(", ")
                    ),
                },
            );
        }

        log::info!("✅ SQLite output initialized with WAL mode: {}", path.display());

        Ok(Self {
            conn: Some(conn),
            path,
            registry: registry.clone(),
            tables,
            batch: Vec::with_capacity(1024),
            rows_written: 0,
        })
    }

    fn flush_batch(&mut self) -> Result<(), SinkError> {
        let conn = self.conn.as_mut().ok_or(SinkError::Closed)?;
        if self.batch.is_empty() {
            return Ok(());
        }

        let tx = conn.transaction()?;
        for (handle, row) in &self.batch {
            let table = self
                .tables
                .get(handle)
                .ok_or(SinkError::Schema(SchemaError::UnknownHandle(*handle)))?;
            let mut stmt = tx.prepare_cached(&table.insert_sql)?;
            stmt.execute(params_from_iter(row.iter()))?;
        }
        tx.commit()?;

        log::debug!("✅ Flushed {} rows to SQLite", self.batch.len());
        self.rows_written += self.batch.len() as u64;
        self.batch.clear();
        Ok(())
    }

    /// Table name a handle writes to.
    pub fn table_name(&self, handle: SchemaHandle) -> Option<&str> {
        self.tables.get(&handle).map(|t| t.name.as_str())
    }
}

impl RecordSink for SqliteSink {
    fn append_row(&mut self, handle: SchemaHandle, row: Vec<FieldValue>) -> Result<(), SinkError> {
        if self.conn.is_none() {
            return Err(SinkError::Closed);
        }
        self.registry.validate_row(handle, &row)?;
        self.batch.push((handle, row));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.flush_batch()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush_batch()?;
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| SinkError::Database(e))?;
        }
        log::info!("✅ Closed {} ({} rows)", self.path.display(), self.rows_written);
        Ok(())
    }

    fn buffered_rows(&self) -> usize {
        self.batch.len()
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}
