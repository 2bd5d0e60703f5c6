//! XPS daemon library
//!
//! This module re-exports the daemon's modules for integration testing.

pub mod config;
pub mod dispatcher;
pub mod ingest;

pub use config::{DaemonConfig, StoreConfig, StoreKind};
pub use dispatcher::{DispatcherState, RunContext, RunDispatcher};
pub use ingest::IngestServer;
