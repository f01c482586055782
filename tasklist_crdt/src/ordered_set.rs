use std::sync::Mutex;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tasklist_core::{ActorId, Position, clock::Lamport, position};

use crate::entry::Entry;
use crate::errors::{InvalidOperationSnafu, NotFoundSnafu, PositionConflictSnafu, Result};
use crate::payload::Payload;

/// Tag discriminating an [`Op`] variant for the dedupe key, independent of
/// the payload type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Insert,
    Update,
    Move,
    Remove,
}

/// A single operation against an [`OrderedSet`], tagged by variant rather
/// than dispatched through a trait object — every variant carries its own
/// `(actor, clock)` so dedupe and per-field LWW don't need a wrapper.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Op<P: Payload> {
    Insert {
        id: String,
        actor: ActorId,
        clock: Lamport,
        pos: Position,
        data: P::Partial,
    },
    Update {
        id: String,
        actor: ActorId,
        clock: Lamport,
        data: P::Partial,
    },
    Move {
        id: String,
        actor: ActorId,
        clock: Lamport,
        pos: Position,
    },
    Remove {
        id: String,
        actor: ActorId,
        clock: Lamport,
    },
}

impl<P: Payload> Op<P> {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Insert { .. } => OpKind::Insert,
            Op::Update { .. } => OpKind::Update,
            Op::Move { .. } => OpKind::Move,
            Op::Remove { .. } => OpKind::Remove,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Op::Insert { id, .. } | Op::Update { id, .. } | Op::Move { id, .. } | Op::Remove { id, .. } => id,
        }
    }

    pub fn actor(&self) -> &ActorId {
        match self {
            Op::Insert { actor, .. } | Op::Update { actor, .. } | Op::Move { actor, .. } | Op::Remove { actor, .. } => actor,
        }
    }

    pub fn clock(&self) -> Lamport {
        match self {
            Op::Insert { clock, .. } | Op::Update { clock, .. } | Op::Move { clock, .. } | Op::Remove { clock, .. } => *clock,
        }
    }

    fn dedupe_key(&self) -> (ActorId, Lamport, OpKind, String) {
        (self.actor().clone(), self.clock(), self.kind(), self.id().to_string())
    }
}

/// Generic ordered-set CRDT: entries placed by fractional [`Position`],
/// payload merged field-by-field, deletions tombstoned rather than removed.
///
/// Parameterised by `P: Payload` so list-scoped (task) and registry-scoped
/// records share this one apply/dedupe/ordering implementation.
pub struct OrderedSet<P: Payload> {
    actor: ActorId,
    clock: Lamport,
    entries: HashMap<String, Entry<P>>,
    seen: HashSet<(ActorId, Lamport, OpKind, String)>,
    // A std::sync::Mutex, not RefCell: this is just an interior-mutable
    // cache behind &self, but it must stay Sync so CRDT state can be held
    // across await points by async callers (e.g. the repository crate).
    order_cache: Mutex<Option<Vec<String>>>,
}

impl<P: Payload> OrderedSet<P> {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            clock: Lamport::ZERO,
            entries: HashMap::new(),
            seen: HashSet::new(),
            order_cache: Mutex::new(None),
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn clock(&self) -> Lamport {
        self.clock
    }

    pub fn get(&self, id: &str) -> Option<&Entry<P>> {
        self.entries.get(id)
    }

    pub fn position_of(&self, id: &str) -> Option<&Position> {
        self.entries.get(id).map(|e| &e.pos)
    }

    /// Every known entry, tombstoned or not — what a durable snapshot must
    /// persist to reconstruct exact state (§4.4).
    pub fn all_entries(&self) -> Vec<&Entry<P>> {
        self.entries.values().collect()
    }

    /// Replace this instance's entries and clock wholesale from a decoded
    /// snapshot (§4.6 `resetFromState`). Dedupe state for already-applied
    /// ops is cleared; subsequent `apply` calls dedupe only against what's
    /// replayed from here on, which is correct since the snapshot itself
    /// carries no per-op record to collide with.
    pub fn reset_from_entries(&mut self, clock: Lamport, entries: Vec<Entry<P>>) {
        self.entries = entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        self.clock = clock;
        self.seen.clear();
        self.invalidate_cache();
    }

    fn invalidate_cache(&self) {
        *self.order_cache.lock().unwrap() = None;
    }

    /// Live entries (not tombstoned) in list order.
    pub fn snapshot(&self) -> Vec<&Entry<P>> {
        let mut cache = self.order_cache.lock().unwrap();
        if cache.is_none() {
            let mut live: Vec<&str> = self
                .entries
                .values()
                .filter(|e| !e.is_deleted())
                .map(|e| e.id.as_str())
                .collect();
            live.sort_by(|a, b| {
                let ea = &self.entries[*a];
                let eb = &self.entries[*b];
                ea.pos.cmp(&eb.pos).then_with(|| ea.id.cmp(&eb.id))
            });
            *cache = Some(live.into_iter().map(String::from).collect());
        }
        cache
            .as_ref()
            .unwrap()
            .iter()
            .map(|id| &self.entries[id])
            .collect()
    }

    fn next_clock(&mut self) -> Lamport {
        self.clock.advance(None)
    }

    /// Advance this instance's Lamport clock for an operation that lives
    /// outside the ordered set (the task list's own `renameList`).
    pub fn advance_clock(&mut self) -> Lamport {
        self.next_clock()
    }

    /// Merge an observed clock without generating anything of our own; used
    /// to keep the instance clock consistent with a `renameList` op applied
    /// from a remote origin.
    pub fn merge_clock(&mut self, observed: Lamport) {
        self.clock.merge(observed);
    }

    /// The live id immediately before `id` and the one immediately after it
    /// in snapshot order — i.e. the `(afterId, beforeId)` pair that would
    /// recreate this insertion point later (undo re-inserting a removed
    /// entry roughly where it was).
    pub fn live_neighbours(&self, id: &str) -> (Option<String>, Option<String>) {
        let order = self.snapshot();
        let Some(index) = order.iter().position(|e| e.id() == id) else {
            return (None, None);
        };
        let predecessor = index.checked_sub(1).map(|i| order[i].id().to_string());
        let successor = order.get(index + 1).map(|e| e.id().to_string());
        (predecessor, successor)
    }

    /// Resolve the positions flanking an insertion point named by the ids
    /// either side of it (`None` meaning "at the very start/end").
    pub fn neighbours(&self, after_id: Option<&str>, before_id: Option<&str>) -> (Option<Position>, Option<Position>) {
        (
            after_id.and_then(|id| self.position_of(id)).cloned(),
            before_id.and_then(|id| self.position_of(id)).cloned(),
        )
    }

    pub fn generate_insert(
        &mut self,
        id: String,
        data: P::Partial,
        after_id: Option<&str>,
        before_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Op<P>> {
        let (left, right) = self.neighbours(after_id, before_id);
        let pos = position::between(left.as_ref(), right.as_ref(), &self.actor).context(PositionConflictSnafu)?;
        let clock = self.next_clock();
        let op = Op::Insert {
            id,
            actor: self.actor.clone(),
            clock,
            pos,
            data,
        };
        self.apply(op.clone(), now);
        Ok(op)
    }

    pub fn generate_update(&mut self, id: &str, data: P::Partial, now: DateTime<Utc>) -> Result<Op<P>> {
        self.entries.get(id).context(NotFoundSnafu { id })?;
        let clock = self.next_clock();
        let op = Op::Update {
            id: id.to_string(),
            actor: self.actor.clone(),
            clock,
            data,
        };
        self.apply(op.clone(), now);
        Ok(op)
    }

    pub fn generate_move(
        &mut self,
        id: &str,
        after_id: Option<&str>,
        before_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Op<P>> {
        self.entries.get(id).context(NotFoundSnafu { id })?;
        let (left, right) = self.neighbours(after_id, before_id);
        let pos = position::between(left.as_ref(), right.as_ref(), &self.actor).context(PositionConflictSnafu)?;
        let clock = self.next_clock();
        let op = Op::Move {
            id: id.to_string(),
            actor: self.actor.clone(),
            clock,
            pos,
        };
        self.apply(op.clone(), now);
        Ok(op)
    }

    pub fn generate_remove(&mut self, id: &str, now: DateTime<Utc>) -> Result<Op<P>> {
        self.entries.get(id).context(NotFoundSnafu { id })?;
        let clock = self.next_clock();
        let op = Op::Remove {
            id: id.to_string(),
            actor: self.actor.clone(),
            clock,
        };
        self.apply(op.clone(), now);
        Ok(op)
    }

    /// Apply a (local or remote) operation. Returns whether it produced a
    /// visible change. Never errors: a malformed or stale remote op is just
    /// a no-op (§7).
    pub fn apply(&mut self, op: Op<P>, now: DateTime<Utc>) -> bool {
        if !self.seen.insert(op.dedupe_key()) {
            return false;
        }
        self.clock.merge(op.clock());

        let changed = match op {
            Op::Insert { id, actor, clock, pos, data } => self.apply_insert(id, actor, clock, pos, data, now),
            Op::Update { id, actor, clock, data } => self.apply_update(&id, &actor, clock, data, now),
            Op::Move { id, actor: _, clock, pos } => self.apply_move(&id, clock, pos, now),
            Op::Remove { id, actor: _, clock } => self.apply_remove(&id, clock, now),
        };
        if changed {
            self.invalidate_cache();
        }
        changed
    }

    fn apply_insert(&mut self, id: String, actor: ActorId, clock: Lamport, pos: Position, data: P::Partial, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(&id) {
            None => {
                self.entries.insert(
                    id.clone(),
                    Entry {
                        id,
                        pos,
                        pos_clock: clock,
                        data: P::new(data, clock, &actor),
                        created_at: now,
                        updated_at: now,
                        deleted_at: None,
                    },
                );
                true
            }
            Some(entry) => {
                let mut changed = false;
                if let Some(deleted_at) = entry.deleted_at {
                    if clock > deleted_at {
                        entry.deleted_at = None;
                        changed = true;
                    }
                }
                if entry.data.apply_partial(data, clock, &actor) {
                    changed = true;
                }
                if clock > entry.pos_clock {
                    entry.pos = pos;
                    entry.pos_clock = clock;
                    changed = true;
                }
                if changed {
                    entry.updated_at = now;
                }
                changed
            }
        }
    }

    fn apply_update(&mut self, id: &str, actor: &ActorId, clock: Lamport, data: P::Partial, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let changed = entry.data.apply_partial(data, clock, actor);
        if changed {
            entry.updated_at = now;
        }
        changed
    }

    fn apply_move(&mut self, id: &str, clock: Lamport, pos: Position, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if clock > entry.pos_clock {
            entry.pos = pos;
            entry.pos_clock = clock;
            entry.updated_at = now;
            true
        } else {
            false
        }
    }

    fn apply_remove(&mut self, id: &str, clock: Lamport, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let should_apply = entry.deleted_at.is_none_or(|deleted_at| clock > deleted_at);
        if should_apply {
            entry.deleted_at = Some(clock);
            entry.updated_at = now;
        }
        should_apply
    }

    /// Reject an operation referencing an empty actor id before it reaches
    /// `apply`; used by wire decoding, never by local generation (the
    /// instance's own actor is never empty by construction).
    pub fn validate_actor(actor: &ActorId) -> Result<()> {
        snafu::ensure!(
            !actor.is_empty(),
            InvalidOperationSnafu {
                reason: "operation actor must not be empty".to_string(),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Text(crate::lww::Lww<String>);

    impl Payload for Text {
        type Partial = String;

        fn new(partial: Self::Partial, clock: Lamport, actor: &ActorId) -> Self {
            Text(crate::lww::Lww::new(partial, clock, actor.clone()))
        }

        fn apply_partial(&mut self, partial: Self::Partial, clock: Lamport, actor: &ActorId) -> bool {
            self.0.apply(partial, clock, actor)
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    #[test]
    fn insert_then_snapshot_is_ordered() {
        let mut set: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        set.generate_insert("1".into(), "one".into(), None, None, now()).unwrap();
        set.generate_insert("2".into(), "two".into(), Some("1"), None, now()).unwrap();
        set.generate_insert("0".into(), "zero".into(), None, Some("1"), now()).unwrap();
        let ids: Vec<_> = set.snapshot().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[test]
    fn remove_tombstones_but_keeps_payload() {
        let mut set: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        set.generate_insert("1".into(), "one".into(), None, None, now()).unwrap();
        set.generate_remove("1", now()).unwrap();
        assert!(set.snapshot().is_empty());
        let entry = set.get("1").unwrap();
        assert!(entry.is_deleted());
        assert_eq!(entry.data().0.get(), "one");
    }

    #[test]
    fn duplicate_remote_op_is_a_no_op() {
        let mut set: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        let op = set.generate_insert("1".into(), "one".into(), None, None, now()).unwrap();

        let mut replica: OrderedSet<Text> = OrderedSet::new(ActorId::from("b"));
        assert!(replica.apply(op.clone(), now()));
        assert!(!replica.apply(op, now()));
    }

    #[test]
    fn stale_remove_does_not_resurrect_a_newer_tombstone() {
        let mut set: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        let insert = set.generate_insert("1".into(), "one".into(), None, None, now()).unwrap();
        let remove_new = Op::Remove {
            id: "1".into(),
            actor: ActorId::from("a"),
            clock: Lamport::new(100),
        };
        let remove_old = Op::Remove {
            id: "1".into(),
            actor: ActorId::from("b"),
            clock: Lamport::new(1),
        };

        let mut replica: OrderedSet<Text> = OrderedSet::new(ActorId::from("c"));
        replica.apply(insert, now());
        replica.apply(remove_new, now());
        replica.apply(remove_old, now());
        assert!(replica.get("1").unwrap().is_deleted());
    }

    #[test]
    fn update_on_unknown_id_is_local_error_but_remote_no_op() {
        let mut set: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        assert!(set.generate_update("missing", "x".into(), now()).is_err());

        let remote_update = Op::Update {
            id: "missing".into(),
            actor: ActorId::from("b"),
            clock: Lamport::new(1),
            data: "x".into(),
        };
        assert!(!set.apply(remote_update, now()));
    }

    #[test]
    fn concurrent_inserts_converge_regardless_of_delivery_order() {
        let mut a: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        let op_a = a.generate_insert("root".into(), "root".into(), None, None, now()).unwrap();

        let mut left: OrderedSet<Text> = OrderedSet::new(ActorId::from("a"));
        left.apply(op_a.clone(), now());
        let op_left = left.generate_insert("left".into(), "left".into(), None, Some("root"), now()).unwrap();

        let mut right: OrderedSet<Text> = OrderedSet::new(ActorId::from("b"));
        right.apply(op_a.clone(), now());
        let op_right = right.generate_insert("right".into(), "right".into(), Some("root"), None, now()).unwrap();

        let mut replica1: OrderedSet<Text> = OrderedSet::new(ActorId::from("c"));
        for op in [op_a.clone(), op_left.clone(), op_right.clone()] {
            replica1.apply(op, now());
        }
        let mut replica2: OrderedSet<Text> = OrderedSet::new(ActorId::from("d"));
        for op in [op_a, op_right, op_left] {
            replica2.apply(op, now());
        }

        let ids1: Vec<_> = replica1.snapshot().iter().map(|e| e.id().to_string()).collect();
        let ids2: Vec<_> = replica2.snapshot().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids1, ids2);
        assert_eq!(ids1, vec!["left", "root", "right"]);
    }
}
