//! Storage backend contract

use serde::{Deserialize, Serialize};
use xps_models::{Sample2D, Table};

use crate::error::BackendError;

/// A run-scoped storage node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunHandle {
    name: String,
}

impl RunHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Array,
    Table,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Array => "array",
            EntityKind::Table => "table",
        }
    }
}

/// An array or table inside a run node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    run: String,
    name: String,
    kind: EntityKind,
}

impl EntityHandle {
    pub fn new(run: impl Into<String>, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            run: run.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// `runs/<scan>/<entity>`
    pub fn path(&self) -> String {
        format!("runs/{}/{}", self.run, self.name)
    }
}

/// Structure fixed at entity creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntitySchema {
    /// Shape of one slice; the entity's leading axis counts slices.
    Array { slice_shape: Vec<usize> },
    Table { columns: Vec<String> },
}

impl EntitySchema {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySchema::Array { .. } => EntityKind::Array,
            EntitySchema::Table { .. } => EntityKind::Table,
        }
    }
}

/// A store holding run nodes with append-only arrays and tables.
///
/// Calls block. Implementations must reject any array patch whose offset is
/// not the entity's current length.
pub trait StoreBackend: Send + Sync {
    /// Return the run node called `name`, creating it if absent.
    fn create_or_get(&self, name: &str) -> Result<RunHandle, BackendError>;

    /// Create an empty entity under `parent`. Re-creating an existing entity
    /// with an identical schema returns the existing handle.
    fn write_initial(
        &self,
        parent: &RunHandle,
        name: &str,
        schema: &EntitySchema,
    ) -> Result<EntityHandle, BackendError>;

    /// Number of slices stored in an array entity.
    fn array_len(&self, handle: &EntityHandle) -> Result<u64, BackendError>;

    /// Write `data` as slice `offset`. With `extend`, the entity grows by one.
    fn patch_at_offset(
        &self,
        handle: &EntityHandle,
        data: &Sample2D,
        offset: u64,
        extend: bool,
    ) -> Result<(), BackendError>;

    /// Append `rows` to partition `partition_index` of a table entity.
    fn append_partition(
        &self,
        handle: &EntityHandle,
        rows: &Table,
        partition_index: usize,
    ) -> Result<(), BackendError>;

    /// Read back one array slice.
    fn read_slice(&self, handle: &EntityHandle, index: u64) -> Result<Vec<f64>, BackendError>;

    /// Read back every row of a table, partitions in index order.
    fn read_table(&self, handle: &EntityHandle) -> Result<Table, BackendError>;
}

/// Shared argument checks for array patches.
pub(crate) fn check_patch(
    handle: &EntityHandle,
    slice_shape: &[usize],
    length: u64,
    data: &Sample2D,
    offset: u64,
    extend: bool,
) -> Result<(), BackendError> {
    if handle.kind() != EntityKind::Array {
        return Err(BackendError::WrongKind {
            name: handle.name().to_string(),
            expected: "array",
        });
    }
    if data.shape().as_slice() != slice_shape {
        return Err(BackendError::ShapeMismatch {
            expected: slice_shape.to_vec(),
            actual: data.shape().to_vec(),
        });
    }
    if !extend {
        return Err(BackendError::NotExtending { offset });
    }
    if offset != length {
        return Err(BackendError::OffsetMismatch { offset, length });
    }
    Ok(())
}

/// Shared argument checks for table appends.
pub(crate) fn check_rows(
    handle: &EntityHandle,
    columns: &[String],
    rows: &Table,
) -> Result<(), BackendError> {
    if handle.kind() != EntityKind::Table {
        return Err(BackendError::WrongKind {
            name: handle.name().to_string(),
            expected: "table",
        });
    }
    if rows.columns != columns {
        return Err(BackendError::ColumnMismatch {
            expected: columns.to_vec(),
            actual: rows.columns.clone(),
        });
    }
    rows.validate()
        .map_err(|e| BackendError::other(e.to_string()))
}
