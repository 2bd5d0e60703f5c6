//! Append-only run store for XPS frames
//!
//! Every run gets a node named after its scan. On the first frame of a run
//! one array entity per image and one `detected_peaks` table are created from
//! the frame's shapes; each later frame appends exactly one slice to every
//! array, at an offset equal to the array's current length, and one partition
//! of peak rows. Previously written data is never rewritten.
//!
//! Backends implement [`StoreBackend`]:
//!
//! - [`MemoryBackend`]: process-local, used by tests and ephemeral runs
//! - [`SqliteBackend`]: durable, one SQLite file for all runs
//!
//! Backend calls block; async callers go through
//! [`IncrementalStore::run_blocking`].

pub mod backend;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use backend::{EntityHandle, EntityKind, EntitySchema, RunHandle, StoreBackend};
pub use error::{BackendError, Result, StoreError};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{AppendReport, EntitySet, EntityState, IncrementalStore, PEAKS_TABLE, TIMINGS_TABLE};
