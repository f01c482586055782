//! Bridges a local [`tasklist_repository::Repository`] to a remote HTTP+JSON
//! sync server: push/pull of operation envelopes, dataset-generation reset,
//! and a timer-driven poll loop (§4.9).

pub mod engine;
pub mod errors;

pub use engine::{RemoteOpsHandler, SyncEngine, SyncEngineConfig};
pub use errors::{Result, SyncError};
