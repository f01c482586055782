//! Owns every in-memory CRDT instance for one device, mediates every
//! mutation through a single reversible [`mutation::Mutation`] vocabulary,
//! and bridges to durable storage and the sync outbox.

pub mod errors;
pub mod events;
pub mod history;
pub mod hydrator;
pub mod mutation;
pub mod repository;

pub use errors::{Result, RepositoryError};
pub use events::Event;
pub use history::{History, UndoEntry};
pub use mutation::{Mutation, Scope};
pub use repository::Repository;
