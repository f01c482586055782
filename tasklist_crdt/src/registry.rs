use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasklist_core::{ActorId, clock::Lamport};

use crate::errors::Result;
use crate::lww::Lww;
use crate::ordered_set::{Op, OrderedSet};
use crate::payload::Payload;

/// The registry's per-list record: just a display title. List contents live
/// in each list's own [`crate::tasklist::TaskListCrdt`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryPayload {
    pub title: Lww<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryPartial {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
}

impl Payload for RegistryPayload {
    type Partial = RegistryPartial;

    fn new(partial: Self::Partial, clock: Lamport, actor: &ActorId) -> Self {
        RegistryPayload {
            title: Lww::new(partial.title.unwrap_or_default(), clock, actor.clone()),
        }
    }

    fn apply_partial(&mut self, partial: Self::Partial, clock: Lamport, actor: &ActorId) -> bool {
        match partial.title {
            Some(title) => self.title.apply(title, clock, actor),
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntrySnapshot {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The sidebar's list of lists: an ordered set of `{title}` records, one per
/// task list.
pub struct RegistryCrdt {
    set: OrderedSet<RegistryPayload>,
}

impl RegistryCrdt {
    pub fn new(actor: ActorId) -> Self {
        Self { set: OrderedSet::new(actor) }
    }

    pub fn inner(&self) -> &OrderedSet<RegistryPayload> {
        &self.set
    }

    pub fn inner_mut(&mut self) -> &mut OrderedSet<RegistryPayload> {
        &mut self.set
    }

    pub fn snapshot(&self) -> Vec<RegistryEntrySnapshot> {
        self.set
            .snapshot()
            .into_iter()
            .map(|e| RegistryEntrySnapshot {
                id: e.id().to_string(),
                title: e.data().title.get().clone(),
                created_at: e.created_at(),
                updated_at: e.updated_at(),
            })
            .collect()
    }

    pub fn generate_insert(
        &mut self,
        id: String,
        title: String,
        after_id: Option<&str>,
        before_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Op<RegistryPayload>, Vec<RegistryEntrySnapshot>)> {
        let op = self
            .set
            .generate_insert(id, RegistryPartial { title: Some(title) }, after_id, before_id, now)?;
        Ok((op, self.snapshot()))
    }

    /// Renaming a list entry in the sidebar is an ordinary per-field update
    /// of the registry's own `title`, distinct from the list's own
    /// clock-only `renameList` rule (`tasklist::TaskListCrdt::generate_rename`).
    pub fn generate_rename(&mut self, id: &str, title: String, now: DateTime<Utc>) -> Result<(Op<RegistryPayload>, Vec<RegistryEntrySnapshot>)> {
        let op = self.set.generate_update(id, RegistryPartial { title: Some(title) }, now)?;
        Ok((op, self.snapshot()))
    }

    pub fn generate_move(
        &mut self,
        id: &str,
        after_id: Option<&str>,
        before_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Op<RegistryPayload>, Vec<RegistryEntrySnapshot>)> {
        let op = self.set.generate_move(id, after_id, before_id, now)?;
        Ok((op, self.snapshot()))
    }

    pub fn generate_remove(&mut self, id: &str, now: DateTime<Utc>) -> Result<(Op<RegistryPayload>, Vec<RegistryEntrySnapshot>)> {
        let op = self.set.generate_remove(id, now)?;
        Ok((op, self.snapshot()))
    }

    /// Resurrect a tombstoned registry entry with an empty partial, leaving
    /// its previously-set title untouched (see
    /// `TaskListCrdt::generate_restore` for the identical trick).
    pub fn generate_restore(&mut self, id: String, after_id: Option<&str>, before_id: Option<&str>, now: DateTime<Utc>) -> Result<(Op<RegistryPayload>, Vec<RegistryEntrySnapshot>)> {
        let op = self.set.generate_insert(id, RegistryPartial::default(), after_id, before_id, now)?;
        Ok((op, self.snapshot()))
    }

    pub fn apply(&mut self, op: Op<RegistryPayload>, now: DateTime<Utc>) -> bool {
        self.set.apply(op, now)
    }

    pub fn encode_snapshot(&self) -> Result<String> {
        crate::codec::encode_snapshot(self.set.clock(), &self.set.all_entries())
    }

    pub fn reset_from_snapshot(&mut self, json: &str) -> Result<()> {
        let (clock, entries) = crate::codec::decode_snapshot(json)?;
        self.set.reset_from_entries(clock, entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    #[test]
    fn insert_and_rename_a_list_entry() {
        let mut registry = RegistryCrdt::new(ActorId::from("a"));
        registry.generate_insert("l1".into(), "Groceries".into(), None, None, now()).unwrap();
        let (_, snapshot) = registry.generate_rename("l1", "Shopping".into(), now()).unwrap();
        assert_eq!(snapshot[0].title, "Shopping");
    }

    #[test]
    fn remove_hides_entry_from_snapshot() {
        let mut registry = RegistryCrdt::new(ActorId::from("a"));
        registry.generate_insert("l1".into(), "Groceries".into(), None, None, now()).unwrap();
        registry.generate_remove("l1", now()).unwrap();
        assert!(registry.snapshot().is_empty());
    }
}
