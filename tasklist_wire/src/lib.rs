pub mod dataset;
pub mod envelope;
pub mod errors;
pub mod export;
pub mod protocol;
pub mod scope;

pub use dataset::DatasetSnapshot;
pub use envelope::{DedupeKey, SyncEnvelope};
pub use errors::{Result, WireError};
pub use scope::Scope;
