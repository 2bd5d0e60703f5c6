//! Process-local backend

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use xps_models::{Sample2D, Table};

use crate::backend::{
    check_patch, check_rows, EntityHandle, EntityKind, EntitySchema, RunHandle, StoreBackend,
};
use crate::error::BackendError;

#[derive(Default)]
struct MemoryRun {
    entities: BTreeMap<String, MemoryEntity>,
}

enum MemoryEntity {
    Array {
        slice_shape: Vec<usize>,
        slices: Vec<Vec<f64>>,
    },
    Table {
        columns: Vec<String>,
        partitions: BTreeMap<usize, Vec<Vec<Value>>>,
    },
}

impl MemoryEntity {
    fn schema(&self) -> EntitySchema {
        match self {
            MemoryEntity::Array { slice_shape, .. } => EntitySchema::Array {
                slice_shape: slice_shape.clone(),
            },
            MemoryEntity::Table { columns, .. } => EntitySchema::Table {
                columns: columns.clone(),
            },
        }
    }
}

/// Thread-safe in-memory store. Counts mutating calls so tests can assert
/// that nothing was written.
#[derive(Default)]
pub struct MemoryBackend {
    runs: Mutex<HashMap<String, MemoryRun>>,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutating calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Names of all run nodes, sorted.
    pub fn run_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.runs.lock() {
            Ok(runs) => runs.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Names of the entities under `run`, sorted.
    pub fn entity_names(&self, run: &str) -> Vec<String> {
        match self.runs.lock() {
            Ok(runs) => runs
                .get(run)
                .map(|r| r.entities.keys().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryRun>>, BackendError> {
        self.runs.lock().map_err(|_| BackendError::Poisoned)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn entity<'a>(
    runs: &'a mut HashMap<String, MemoryRun>,
    handle: &EntityHandle,
) -> Result<&'a mut MemoryEntity, BackendError> {
    runs.get_mut(handle.run())
        .ok_or_else(|| BackendError::RunNotFound(handle.run().to_string()))?
        .entities
        .get_mut(handle.name())
        .ok_or_else(|| BackendError::EntityNotFound(handle.path()))
}

impl StoreBackend for MemoryBackend {
    fn create_or_get(&self, name: &str) -> Result<RunHandle, BackendError> {
        let mut runs = self.lock()?;
        if !runs.contains_key(name) {
            runs.insert(name.to_string(), MemoryRun::default());
            self.record_write();
        }
        Ok(RunHandle::new(name))
    }

    fn write_initial(
        &self,
        parent: &RunHandle,
        name: &str,
        schema: &EntitySchema,
    ) -> Result<EntityHandle, BackendError> {
        let mut runs = self.lock()?;
        let run = runs
            .get_mut(parent.name())
            .ok_or_else(|| BackendError::RunNotFound(parent.name().to_string()))?;

        let handle = EntityHandle::new(parent.name(), name, schema.kind());
        if let Some(existing) = run.entities.get(name) {
            if existing.schema() == *schema {
                return Ok(handle);
            }
            return Err(BackendError::SchemaConflict {
                name: name.to_string(),
            });
        }

        let entity = match schema {
            EntitySchema::Array { slice_shape } => MemoryEntity::Array {
                slice_shape: slice_shape.clone(),
                slices: Vec::new(),
            },
            EntitySchema::Table { columns } => MemoryEntity::Table {
                columns: columns.clone(),
                partitions: BTreeMap::new(),
            },
        };
        run.entities.insert(name.to_string(), entity);
        self.record_write();
        Ok(handle)
    }

    fn array_len(&self, handle: &EntityHandle) -> Result<u64, BackendError> {
        let mut runs = self.lock()?;
        match entity(&mut runs, handle)? {
            MemoryEntity::Array { slices, .. } => Ok(slices.len() as u64),
            MemoryEntity::Table { .. } => Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "array",
            }),
        }
    }

    fn patch_at_offset(
        &self,
        handle: &EntityHandle,
        data: &Sample2D,
        offset: u64,
        extend: bool,
    ) -> Result<(), BackendError> {
        let mut runs = self.lock()?;
        match entity(&mut runs, handle)? {
            MemoryEntity::Array {
                slice_shape,
                slices,
            } => {
                check_patch(handle, slice_shape, slices.len() as u64, data, offset, extend)?;
                slices.push(data.data().to_vec());
            }
            MemoryEntity::Table { .. } => {
                return Err(BackendError::WrongKind {
                    name: handle.name().to_string(),
                    expected: "array",
                })
            }
        }
        self.record_write();
        Ok(())
    }

    fn append_partition(
        &self,
        handle: &EntityHandle,
        rows: &Table,
        partition_index: usize,
    ) -> Result<(), BackendError> {
        let mut runs = self.lock()?;
        match entity(&mut runs, handle)? {
            MemoryEntity::Table {
                columns,
                partitions,
            } => {
                check_rows(handle, columns, rows)?;
                partitions
                    .entry(partition_index)
                    .or_default()
                    .extend(rows.rows.iter().cloned());
            }
            MemoryEntity::Array { .. } => {
                return Err(BackendError::WrongKind {
                    name: handle.name().to_string(),
                    expected: "table",
                })
            }
        }
        self.record_write();
        Ok(())
    }

    fn read_slice(&self, handle: &EntityHandle, index: u64) -> Result<Vec<f64>, BackendError> {
        let mut runs = self.lock()?;
        match entity(&mut runs, handle)? {
            MemoryEntity::Array { slices, .. } => slices
                .get(index as usize)
                .cloned()
                .ok_or(BackendError::SliceOutOfRange {
                    index,
                    length: slices.len() as u64,
                }),
            MemoryEntity::Table { .. } => Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "array",
            }),
        }
    }

    fn read_table(&self, handle: &EntityHandle) -> Result<Table, BackendError> {
        let mut runs = self.lock()?;
        match entity(&mut runs, handle)? {
            MemoryEntity::Table {
                columns,
                partitions,
            } => Ok(Table {
                columns: columns.clone(),
                rows: partitions.values().flatten().cloned().collect(),
            }),
            MemoryEntity::Array { .. } => Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "table",
            }),
        }
    }
}
