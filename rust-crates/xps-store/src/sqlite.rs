//! SQLite backend for durable run storage
//!
//! One database holds every run. Array slices are stored as little-endian
//! `f64` blobs keyed by `(run, entity, idx)`; table rows as JSON arrays.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use xps_models::{Sample2D, Table};

use crate::backend::{
    check_patch, check_rows, EntityHandle, EntityKind, EntitySchema, RunHandle, StoreBackend,
};
use crate::error::BackendError;

/// Thread-safe SQLite run store
pub struct SqliteBackend {
    db_path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, BackendError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        let backend = Self {
            db_path,
            conn: Mutex::new(conn),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, BackendError> {
        let backend = Self {
            db_path: PathBuf::from(":memory:"),
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        self.conn.lock().map_err(|_| BackendError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), BackendError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                run TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                schema TEXT NOT NULL,
                length INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (run, name),
                FOREIGN KEY (run) REFERENCES runs(name)
            );

            CREATE TABLE IF NOT EXISTS array_slices (
                run TEXT NOT NULL,
                name TEXT NOT NULL,
                idx INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (run, name, idx)
            );

            CREATE TABLE IF NOT EXISTS table_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run TEXT NOT NULL,
                name TEXT NOT NULL,
                partition_index INTEGER NOT NULL,
                row TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_table_rows_entity
                ON table_rows(run, name, partition_index, id);",
        )?;
        Ok(())
    }

    /// Schema and length of an entity.
    fn entity_info(
        conn: &Connection,
        handle: &EntityHandle,
    ) -> Result<(EntitySchema, u64), BackendError> {
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT schema, length FROM entities WHERE run = ?1 AND name = ?2",
                params![handle.run(), handle.name()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (schema, length) = row.ok_or_else(|| BackendError::EntityNotFound(handle.path()))?;
        Ok((serde_json::from_str(&schema)?, length as u64))
    }
}

fn encode_slice(data: &[f64]) -> Vec<u8> {
    data.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_slice(blob: &[u8]) -> Vec<f64> {
    blob.chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect()
}

impl StoreBackend for SqliteBackend {
    fn create_or_get(&self, name: &str) -> Result<RunHandle, BackendError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO runs (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        Ok(RunHandle::new(name))
    }

    fn write_initial(
        &self,
        parent: &RunHandle,
        name: &str,
        schema: &EntitySchema,
    ) -> Result<EntityHandle, BackendError> {
        let conn = self.lock()?;

        let run_exists: Option<String> = conn
            .query_row(
                "SELECT name FROM runs WHERE name = ?1",
                params![parent.name()],
                |row| row.get(0),
            )
            .optional()?;
        if run_exists.is_none() {
            return Err(BackendError::RunNotFound(parent.name().to_string()));
        }

        let handle = EntityHandle::new(parent.name(), name, schema.kind());
        match Self::entity_info(&conn, &handle) {
            Ok((existing, _)) if existing == *schema => return Ok(handle),
            Ok(_) => {
                return Err(BackendError::SchemaConflict {
                    name: name.to_string(),
                })
            }
            Err(BackendError::EntityNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        conn.execute(
            "INSERT INTO entities (run, name, kind, schema, length) VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                parent.name(),
                name,
                schema.kind().as_str(),
                serde_json::to_string(schema)?
            ],
        )?;
        Ok(handle)
    }

    fn array_len(&self, handle: &EntityHandle) -> Result<u64, BackendError> {
        let conn = self.lock()?;
        match Self::entity_info(&conn, handle)? {
            (EntitySchema::Array { .. }, length) => Ok(length),
            (EntitySchema::Table { .. }, _) => Err(BackendError::WrongKind {
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
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let (schema, length) = Self::entity_info(&tx, handle)?;
        let EntitySchema::Array { slice_shape } = schema else {
            return Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "array",
            });
        };
        check_patch(handle, &slice_shape, length, data, offset, extend)?;

        tx.execute(
            "INSERT INTO array_slices (run, name, idx, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                handle.run(),
                handle.name(),
                offset as i64,
                encode_slice(data.data())
            ],
        )?;
        tx.execute(
            "UPDATE entities SET length = ?3 WHERE run = ?1 AND name = ?2",
            params![handle.run(), handle.name(), (offset + 1) as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn append_partition(
        &self,
        handle: &EntityHandle,
        rows: &Table,
        partition_index: usize,
    ) -> Result<(), BackendError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let (schema, length) = Self::entity_info(&tx, handle)?;
        let EntitySchema::Table { columns } = schema else {
            return Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "table",
            });
        };
        check_rows(handle, &columns, rows)?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO table_rows (run, name, partition_index, row) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in &rows.rows {
                insert.execute(params![
                    handle.run(),
                    handle.name(),
                    partition_index as i64,
                    serde_json::to_string(row)?
                ])?;
            }
        }
        tx.execute(
            "UPDATE entities SET length = ?3 WHERE run = ?1 AND name = ?2",
            params![
                handle.run(),
                handle.name(),
                (length + rows.len() as u64) as i64
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn read_slice(&self, handle: &EntityHandle, index: u64) -> Result<Vec<f64>, BackendError> {
        let conn = self.lock()?;
        if handle.kind() != EntityKind::Array {
            return Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "array",
            });
        }
        let (_, length) = Self::entity_info(&conn, handle)?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM array_slices WHERE run = ?1 AND name = ?2 AND idx = ?3",
                params![handle.run(), handle.name(), index as i64],
                |row| row.get(0),
            )
            .optional()?;

        blob.map(|b| decode_slice(&b))
            .ok_or(BackendError::SliceOutOfRange { index, length })
    }

    fn read_table(&self, handle: &EntityHandle) -> Result<Table, BackendError> {
        let conn = self.lock()?;
        let (schema, _) = Self::entity_info(&conn, handle)?;
        let EntitySchema::Table { columns } = schema else {
            return Err(BackendError::WrongKind {
                name: handle.name().to_string(),
                expected: "table",
            });
        };

        let mut stmt = conn.prepare(
            "SELECT row FROM table_rows WHERE run = ?1 AND name = ?2
             ORDER BY partition_index, id",
        )?;
        let raw_rows = stmt
            .query_map(params![handle.run(), handle.name()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let rows = raw_rows
            .iter()
            .map(|raw| serde_json::from_str::<Vec<Value>>(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table { columns, rows })
    }
}
