use serde::Serialize;
use serde::de::DeserializeOwned;
use tasklist_core::{ActorId, clock::Lamport};

/// A record type an [`crate::ordered_set::OrderedSet`] can store.
///
/// Per the design note "the ordered-set CRDT is parameterised by payload,
/// treat it as a generic over a record type with a merge rule per field":
/// `Partial` is what an `update` operation carries (only the fields the
/// caller actually changed), and `apply_partial` is the one place each
/// payload wires up its own [`crate::lww::Lww`] fields.
pub trait Payload: Clone + Serialize + DeserializeOwned {
    type Partial: Clone + Serialize + DeserializeOwned;

    /// Build a fresh payload from the partial carried by an `insert` op.
    /// Fields omitted from `partial` take a type-appropriate default.
    fn new(partial: Self::Partial, clock: Lamport, actor: &ActorId) -> Self;

    /// Apply `partial`'s fields in place, field-level LWW. Returns whether
    /// any field actually changed.
    fn apply_partial(&mut self, partial: Self::Partial, clock: Lamport, actor: &ActorId) -> bool;
}
