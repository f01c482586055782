use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasklist_core::{ActorId, clock::Lamport};

use crate::errors::Result;
use crate::lww::Lww;
use crate::ordered_set::{Op, OrderedSet};
use crate::payload::Payload;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskPayload {
    pub text: Lww<String>,
    pub done: Lww<bool>,
    pub note: Lww<Option<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskPartial {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<Option<String>>,
}

impl Payload for TaskPayload {
    type Partial = TaskPartial;

    fn new(partial: Self::Partial, clock: Lamport, actor: &ActorId) -> Self {
        TaskPayload {
            text: Lww::new(partial.text.unwrap_or_default(), clock, actor.clone()),
            done: Lww::new(partial.done.unwrap_or(false), clock, actor.clone()),
            note: Lww::new(partial.note.unwrap_or(None), clock, actor.clone()),
        }
    }

    fn apply_partial(&mut self, partial: Self::Partial, clock: Lamport, actor: &ActorId) -> bool {
        let mut changed = false;
        if let Some(text) = partial.text {
            changed |= self.text.apply(text, clock, actor);
        }
        if let Some(done) = partial.done {
            changed |= self.done.apply(done, clock, actor);
        }
        if let Some(note) = partial.note {
            changed |= self.note.apply(note, clock, actor);
        }
        changed
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: String,
    pub text: String,
    pub done: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The list's own display title, with the list-level `renameList` rule
/// (clock-only, no actor tie-break): apply iff the arriving clock exceeds
/// the current one, or ties it with a lexicographically greater title.
/// Deliberately not routed through the ordered-set's per-field LWW.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListTitle {
    value: String,
    updated_at: Lamport,
}

impl ListTitle {
    pub fn new(value: String) -> Self {
        Self { value, updated_at: Lamport::ZERO }
    }

    pub fn get(&self) -> &str {
        &self.value
    }

    pub fn apply(&mut self, value: String, clock: Lamport) -> bool {
        if clock > self.updated_at || (clock == self.updated_at && value > self.value) {
            self.value = value;
            self.updated_at = clock;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListState {
    pub title: String,
    pub tasks: Vec<TaskSnapshot>,
}

/// A rename of the list itself, carried alongside ordinary task operations
/// on the wire since it isn't an [`Op`] of the ordered set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameOp {
    pub actor: ActorId,
    pub clock: Lamport,
    pub title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskListOp {
    Task(Op<TaskPayload>),
    Rename(RenameOp),
}

pub struct TaskListCrdt {
    set: OrderedSet<TaskPayload>,
    title: ListTitle,
}

impl TaskListCrdt {
    pub fn new(actor: ActorId, title: String) -> Self {
        Self {
            set: OrderedSet::new(actor),
            title: ListTitle::new(title),
        }
    }

    pub fn inner(&self) -> &OrderedSet<TaskPayload> {
        &self.set
    }

    pub fn inner_mut(&mut self) -> &mut OrderedSet<TaskPayload> {
        &mut self.set
    }

    pub fn title(&self) -> &ListTitle {
        &self.title
    }

    fn task_snapshot(&self) -> Vec<TaskSnapshot> {
        self.set
            .snapshot()
            .into_iter()
            .map(|e| TaskSnapshot {
                id: e.id().to_string(),
                text: e.data().text.get().clone(),
                done: *e.data().done.get(),
                note: e.data().note.get().clone(),
                created_at: e.created_at(),
                updated_at: e.updated_at(),
            })
            .collect()
    }

    pub fn state(&self) -> ListState {
        ListState {
            title: self.title.get().to_string(),
            tasks: self.task_snapshot(),
        }
    }

    pub fn generate_insert(
        &mut self,
        id: String,
        text: String,
        after_id: Option<&str>,
        before_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(TaskListOp, ListState)> {
        self.generate_insert_full(id, TaskPartial { text: Some(text), ..Default::default() }, after_id, before_id, now)
    }

    /// Insert with an arbitrary partial payload, for callers restoring a
    /// prior `(text, done, note)` snapshot (a resurrection, or a cross-list
    /// move) rather than starting a fresh task.
    pub fn generate_insert_full(
        &mut self,
        id: String,
        partial: TaskPartial,
        after_id: Option<&str>,
        before_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(TaskListOp, ListState)> {
        let op = self.set.generate_insert(id, partial, after_id, before_id, now)?;
        Ok((TaskListOp::Task(op), self.state()))
    }

    /// Resurrect a tombstoned id with an empty partial: relies on
    /// `OrderedSet::apply_insert`'s resurrection path leaving already-set
    /// Lww fields untouched, so the entry's pre-removal payload reappears
    /// unchanged.
    pub fn generate_restore(&mut self, id: String, after_id: Option<&str>, before_id: Option<&str>, now: DateTime<Utc>) -> Result<(TaskListOp, ListState)> {
        self.generate_insert_full(id, TaskPartial::default(), after_id, before_id, now)
    }

    pub fn generate_update(&mut self, id: &str, text: Option<String>, note: Option<Option<String>>, now: DateTime<Utc>) -> Result<(TaskListOp, ListState)> {
        let partial = TaskPartial { text, note, ..Default::default() };
        let op = self.set.generate_update(id, partial, now)?;
        Ok((TaskListOp::Task(op), self.state()))
    }

    pub fn generate_toggle(&mut self, id: &str, now: DateTime<Utc>) -> Result<(TaskListOp, ListState)> {
        let current = self.set.get(id).map(|e| *e.data().done.get()).unwrap_or(false);
        let partial = TaskPartial { done: Some(!current), ..Default::default() };
        let op = self.set.generate_update(id, partial, now)?;
        Ok((TaskListOp::Task(op), self.state()))
    }

    pub fn generate_move(&mut self, id: &str, after_id: Option<&str>, before_id: Option<&str>, now: DateTime<Utc>) -> Result<(TaskListOp, ListState)> {
        let op = self.set.generate_move(id, after_id, before_id, now)?;
        Ok((TaskListOp::Task(op), self.state()))
    }

    pub fn generate_remove(&mut self, id: &str, now: DateTime<Utc>) -> Result<(TaskListOp, ListState)> {
        let op = self.set.generate_remove(id, now)?;
        Ok((TaskListOp::Task(op), self.state()))
    }

    pub fn generate_rename(&mut self, title: String) -> (TaskListOp, ListState) {
        let clock = self.set.advance_clock();
        self.title.apply(title.clone(), clock);
        let op = RenameOp { actor: self.set.actor().clone(), clock, title };
        (TaskListOp::Rename(op), self.state())
    }

    pub fn apply(&mut self, op: TaskListOp, now: DateTime<Utc>) -> bool {
        match op {
            TaskListOp::Task(op) => self.set.apply(op, now),
            TaskListOp::Rename(rename) => {
                self.set.merge_clock(rename.clock);
                self.title.apply(rename.title, rename.clock)
            }
        }
    }

    /// Persisted snapshot: the ordered set's entries plus the list's own
    /// title and its clock, wrapped in one envelope.
    pub fn encode_snapshot(&self) -> Result<String> {
        let wire = TaskListSnapshotWire {
            title: self.title.value.clone(),
            title_clock: self.title.updated_at,
            entries: crate::codec::encode_entries_value(self.set.clock(), &self.set.all_entries())?,
        };
        crate::codec::wrap_envelope(crate::codec::TASK_LIST_SCHEMA, crate::codec::TASK_LIST_VERSION, &wire)
    }

    pub fn reset_from_snapshot(&mut self, json: &str) -> Result<()> {
        let wire: TaskListSnapshotWire = crate::codec::unwrap_envelope(json, crate::codec::TASK_LIST_SCHEMA)?;
        let (clock, entries) = crate::codec::decode_entries_value(wire.entries)?;
        self.set.reset_from_entries(clock, entries);
        self.title.value = wire.title;
        self.title.updated_at = wire.title_clock;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct TaskListSnapshotWire {
    title: String,
    title_clock: Lamport,
    entries: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    #[test]
    fn insert_toggle_and_remove_a_task() {
        let mut list = TaskListCrdt::new(ActorId::from("a"), "Groceries".into());
        let (_, state) = list.generate_insert("t1".into(), "milk".into(), None, None, now()).unwrap();
        assert_eq!(state.tasks[0].text, "milk");
        assert!(!state.tasks[0].done);

        let (_, state) = list.generate_toggle("t1", now()).unwrap();
        assert!(state.tasks[0].done);

        let (_, state) = list.generate_remove("t1", now()).unwrap();
        assert!(state.tasks.is_empty());
    }

    #[test]
    fn rename_is_clock_only_and_ignores_actor() {
        let mut replica = TaskListCrdt::new(ActorId::from("b"), "old".into());
        let newer = RenameOp { actor: ActorId::from("a"), clock: Lamport::new(5), title: "newer".into() };
        assert!(replica.apply(TaskListOp::Rename(newer), now()));
        assert_eq!(replica.title().get(), "newer");

        let stale = RenameOp { actor: ActorId::from("z"), clock: Lamport::new(1), title: "stale".into() };
        assert!(!replica.apply(TaskListOp::Rename(stale), now()));
        assert_eq!(replica.title().get(), "newer");
    }

    #[test]
    fn snapshot_round_trips_title_and_tasks() {
        let mut list = TaskListCrdt::new(ActorId::from("a"), "Groceries".into());
        list.generate_insert("t1".into(), "milk".into(), None, None, now()).unwrap();
        list.generate_rename("Shopping".into());

        let json = list.encode_snapshot().unwrap();
        let mut restored = TaskListCrdt::new(ActorId::from("b"), "placeholder".into());
        restored.reset_from_snapshot(&json).unwrap();

        assert_eq!(restored.title().get(), "Shopping");
        assert_eq!(restored.state().tasks[0].text, "milk");
        assert_eq!(restored.inner().clock(), list.inner().clock());
    }

    #[test]
    fn rename_tie_break_is_lexicographic_on_title_not_actor() {
        let mut list = TaskListCrdt::new(ActorId::from("z"), "old".into());
        let same_clock_smaller = RenameOp { actor: ActorId::from("a"), clock: Lamport::new(1), title: "aaa".into() };
        let same_clock_larger = RenameOp { actor: ActorId::from("a"), clock: Lamport::new(1), title: "zzz".into() };
        assert!(list.apply(TaskListOp::Rename(same_clock_smaller), now()));
        assert_eq!(list.title().get(), "aaa");
        assert!(list.apply(TaskListOp::Rename(same_clock_larger), now()));
        assert_eq!(list.title().get(), "zzz");
    }
}
