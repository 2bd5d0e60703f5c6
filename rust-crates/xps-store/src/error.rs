//! Error types for the run store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures raised by a [`StoreBackend`](crate::StoreBackend).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Run node not found: {0}")]
    RunNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Entity '{name}' already exists with a different schema")]
    SchemaConflict { name: String },

    #[error("Entity '{name}' already holds {length} records")]
    NotEmpty { name: String, length: u64 },

    #[error("Entity '{name}' is not a {expected}")]
    WrongKind { name: String, expected: &'static str },

    #[error("Append offset {offset} does not match current length {length}")]
    OffsetMismatch { offset: u64, length: u64 },

    #[error("Patch at offset {offset} would not extend the entity")]
    NotExtending { offset: u64 },

    #[error("Slice shape {actual:?} does not match entity shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Columns {actual:?} do not match table schema {expected:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Slice {index} out of range for entity of length {length}")]
    SliceOutOfRange { index: u64, length: u64 },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Backend failure: {0}")]
    Other(String),
}

impl BackendError {
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

/// Failures surfaced to store callers, tagged with where they happened.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store error in run '{run}', entity '{entity}' (offset {offset:?}): {source}")]
    Backend {
        run: String,
        entity: String,
        offset: Option<u64>,
        #[source]
        source: BackendError,
    },

    #[error("Frame {frame_number} appended to run '{run}' before its entities were created")]
    Precondition { run: String, frame_number: u64 },

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn backend(
        run: impl Into<String>,
        entity: impl Into<String>,
        offset: Option<u64>,
        source: BackendError,
    ) -> Self {
        Self::Backend {
            run: run.into(),
            entity: entity.into(),
            offset,
            source,
        }
    }
}
