//! Record schema registry
//!
//! Each record stream is a named table of typed columns. Schemas are defined
//! once at run start and addressed afterwards through an opaque
//! `SchemaHandle`. After the run's schemas are defined the registry is sealed
//! and rejects further definitions.

use super::types::{FieldValue, RecordKind};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int32,
    Float64,
    Text,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Int32 => "INTEGER",
            ColumnType::Float64 => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (ColumnType::Int32, FieldValue::Int32(_))
                | (ColumnType::Float64, FieldValue::Float64(_))
                | (ColumnType::Text, FieldValue::Text(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub description: String,
    pub columns: Vec<Column>,
}

/// Opaque reference to a schema of one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaHandle {
    registry: u64,
    index: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("registry is sealed, cannot define schema '{0}'")]
    Sealed(String),

    #[error("schema '{0}' is already defined")]
    Duplicate(String),

    #[error("schema '{0}' has no columns")]
    Empty(String),

    #[error("schema handle {0:?} does not belong to this registry")]
    UnknownHandle(SchemaHandle),

    #[error("schema '{schema}' expects {expected} columns, got {actual}")]
    ColumnCount {
        schema: String,
        expected: usize,
        actual: usize,
    },

    #[error("column '{column}' of schema '{schema}' expects {expected:?}")]
    ColumnType {
        schema: String,
        column: String,
        expected: ColumnType,
    },
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    id: u64,
    schemas: Vec<Schema>,
    sealed: bool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            schemas: Vec::new(),
            sealed: false,
        }
    }

    pub fn define_schema(
        &mut self,
        name: &str,
        description: &str,
        columns: &[(&str, ColumnType)],
    ) -> Result<SchemaHandle, SchemaError> {
        if self.sealed {
            return Err(SchemaError::Sealed(name.to_string()));
        }
        if self.schemas.iter().any(|s| s.name == name) {
            return Err(SchemaError::Duplicate(name.to_string()));
        }
        if columns.is_empty() {
            return Err(SchemaError::Empty(name.to_string()));
        }

        self.schemas.push(Schema {
            name: name.to_string(),
            description: description.to_string(),
            columns: columns
                .iter()
                .map(|(column, ty)| Column {
                    name: column.to_string(),
                    ty: *ty,
                })
                .collect(),
        });

        Ok(SchemaHandle {
            registry: self.id,
            index: (self.schemas.len() - 1) as u32,
        })
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn resolve(&self, handle: SchemaHandle) -> Result<&Schema, SchemaError> {
        if handle.registry != self.id {
            return Err(SchemaError::UnknownHandle(handle));
        }
        self.schemas
            .get(handle.index as usize)
            .ok_or(SchemaError::UnknownHandle(handle))
    }

    pub fn contains(&self, handle: SchemaHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Schemas with their handles, in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (SchemaHandle, &Schema)> + '_ {
        let registry = self.id;
        self.schemas.iter().enumerate().map(move |(index, schema)| {
            (
                SchemaHandle {
                    registry,
                    index: index as u32,
                },
                schema,
            )
        })
    }

    /// Check arity and column types of a row.
    pub fn validate_row(&self, handle: SchemaHandle, row: &[FieldValue]) -> Result<(), SchemaError> {
        let schema = self.resolve(handle)?;
        if schema.columns.len() != row.len() {
            return Err(SchemaError::ColumnCount {
                schema: schema.name.clone(),
                expected: schema.columns.len(),
                actual: row.len(),
            });
        }

        for (column, value) in schema.columns.iter().zip(row) {
            if !column.ty.accepts(value) {
                return Err(SchemaError::ColumnType {
                    schema: schema.name.clone(),
                    column: column.name.clone(),
                    expected: column.ty,
                });
            }
        }
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles of the three record streams of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchemas {
    pub edep: SchemaHandle,
    pub spectrum: SchemaHandle,
    pub muon_track: SchemaHandle,
}

impl RecordSchemas {
    pub fn define(registry: &mut SchemaRegistry) -> Result<Self, SchemaError> {
        use ColumnType::*;

        let edep = registry.define_schema(
            "edep_data",
            "Energy deposit per step in a cell",
            &[("event_id", Int32), ("cell_id", Int32), ("edep_mev", Float64)],
        )?;
        let spectrum = registry.define_schema(
            "spectrum_data",
            "Particles leaving a cell through its boundary",
            &[
                ("event_id", Int32),
                ("cell_id", Int32),
                ("particle_name", Text),
                ("energy_mev", Float64),
            ],
        )?;
        let muon_track = registry.define_schema(
            "muon_track_data",
            "Primary track step positions",
            &[
                ("event_id", Int32),
                ("pre_x_cm", Float64),
                ("pre_y_cm", Float64),
                ("pre_z_cm", Float64),
                ("post_x_cm", Float64),
                ("post_y_cm", Float64),
                ("post_z_cm", Float64),
            ],
        )?;

        Ok(Self {
            edep,
            spectrum,
            muon_track,
        })
    }

    pub fn handle(&self, kind: RecordKind) -> SchemaHandle {
        match kind {
            RecordKind::EnergyDeposit => self.edep,
            RecordKind::BoundaryCrossing => self.spectrum,
            RecordKind::PrimaryTrajectory => self.muon_track,
        }
    }

    pub fn all(&self) -> [SchemaHandle; 3] {
        [self.edep, self.spectrum, self.muon_track]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_run_schemas() {
        let mut registry = SchemaRegistry::new();
        let schemas = RecordSchemas::define(&mut registry).unwrap();

        let names: Vec<&str> = registry.iter().map(|(_, s)| s.name.as_str()).collect();
        assert_eq!(names, vec!["edep_data", "spectrum_data", "muon_track_data"]);

        let spectrum = registry.resolve(schemas.spectrum).unwrap();
        assert_eq!(spectrum.columns[2].name, "particle_name");
        assert_eq!(spectrum.columns[2].ty, ColumnType::Text);
        assert_eq!(registry.resolve(schemas.muon_track).unwrap().columns.len(), 7);
    }

    #[test]
    fn test_sealed_registry_rejects_definitions() {
        let mut registry = SchemaRegistry::new();
        RecordSchemas::define(&mut registry).unwrap();
        registry.seal();

        let result = registry.define_schema("late", "", &[("x", ColumnType::Int32)]);
        assert_eq!(result, Err(SchemaError::Sealed("late".to_string())));
    }

    #[test]
    fn test_duplicate_and_empty_rejected() {
        let mut registry = SchemaRegistry::new();
        registry
            .define_schema("edep_data", "", &[("event_id", ColumnType::Int32)])
            .unwrap();

        assert!(matches!(
            RecordSchemas::define(&mut registry),
            Err(SchemaError::Duplicate(_))
        ));
        assert!(matches!(
            registry.define_schema("nothing", "", &[]),
            Err(SchemaError::Empty(_))
        ));
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = SchemaRegistry::new();
        let mut second = SchemaRegistry::new();
        let handle = RecordSchemas::define(&mut first).unwrap().edep;
        RecordSchemas::define(&mut second).unwrap();

        assert!(first.contains(handle));
        assert!(!second.contains(handle));
        assert!(matches!(second.resolve(handle), Err(SchemaError::UnknownHandle(_))));
    }

    #[test]
    fn test_validate_row() {
        let mut registry = SchemaRegistry::new();
        let schemas = RecordSchemas::define(&mut registry).unwrap();

        let good = vec![
            FieldValue::Int32(1),
            FieldValue::Int32(5),
            FieldValue::Float64(0.5),
        ];
        registry.validate_row(schemas.edep, &good).unwrap();

        let short = vec![FieldValue::Int32(1)];
        assert!(matches!(
            registry.validate_row(schemas.edep, &short),
            Err(SchemaError::ColumnCount { expected: 3, actual: 1, .. })
        ));

        let wrong = vec![
            FieldValue::Int32(1),
            FieldValue::Text("5".into()),
            FieldValue::Float64(0.5),
        ];
        assert!(matches!(
            registry.validate_row(schemas.edep, &wrong),
            Err(SchemaError::ColumnType { .. })
        ));
    }
}
