use chrono::{DateTime, Utc};
use tasklist_core::{Position, clock::Lamport};

use crate::payload::Payload;

/// One row in an ordered-set CRDT: a stable id, a fractional [`Position`],
/// a payload, and tombstone bookkeeping.
///
/// `pos` is retained after deletion (§3 invariant: tombstones keep `pos`,
/// `updatedAt`, and payload) so a later resurrection doesn't need a fresh
/// position.
#[derive(Clone, Debug)]
pub struct Entry<P: Payload> {
    pub(crate) id: String,
    pub(crate) pos: Position,
    pub(crate) pos_clock: Lamport,
    pub(crate) data: P,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    /// The clock of the `remove` that last tombstoned this id, `None` while
    /// live. Compared against arriving `remove`/`insert` clocks, never used
    /// to order visible entries.
    pub(crate) deleted_at: Option<Lamport>,
}

impl<P: Payload> Entry<P> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pos(&self) -> &Position {
        &self.pos
    }

    pub fn data(&self) -> &P {
        &self.data
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
