use std::collections::{HashMap, HashSet};

use chrono::Utc;
use snafu::ResultExt;
use tasklist_core::ActorId;
use tasklist_crdt::codec;
use tasklist_crdt::ordered_set::Op;
use tasklist_crdt::registry::{RegistryCrdt, RegistryPayload};
use tasklist_crdt::tasklist::{TaskListCrdt, TaskListOp};
use tasklist_storage::StorageAdapter;

use crate::errors::{HydrationSnafu, Result};

/// Rebuilds the registry CRDT and every known list's CRDT from durable
/// storage: snapshot first, then replay whatever operations were recorded
/// since that snapshot was written, in Lamport order (§4.6).
pub async fn hydrate(storage: &dyn StorageAdapter, actor: ActorId) -> Result<(RegistryCrdt, HashMap<String, TaskListCrdt>)> {
    let now = Utc::now();

    let registry_record = storage.load_registry().await.context(HydrationSnafu)?;
    let mut registry = RegistryCrdt::new(actor.clone());
    if let Some(state) = registry_record.state.as_deref() {
        registry.reset_from_snapshot(state).ok();
    }
    let mut registry_ops: Vec<_> = registry_record.operations.into_iter().collect();
    registry_ops.sort_by_key(|op| op.clock);
    for stored in registry_ops {
        if let Ok(op) = codec::decode_op::<Op<RegistryPayload>>(&stored.payload) {
            registry.apply(op, now);
        }
    }

    let mut list_ids: HashSet<String> = registry.inner().all_entries().into_iter().map(|e| e.id().to_string()).collect();
    let list_records = storage.load_all_lists().await.context(HydrationSnafu)?;
    for record in &list_records {
        list_ids.insert(record.list_id.clone());
    }

    let mut by_id: HashMap<String, _> = list_records.into_iter().map(|r| (r.list_id.clone(), r)).collect();
    let mut lists = HashMap::new();
    for list_id in list_ids {
        let mut list = TaskListCrdt::new(actor.clone(), String::new());
        if let Some(record) = by_id.remove(&list_id) {
            if let Some(state) = record.state.as_deref() {
                list.reset_from_snapshot(state).ok();
            }
            let mut ops: Vec<_> = record.operations.into_iter().collect();
            ops.sort_by_key(|op| op.clock);
            for stored in ops {
                if let Ok(op) = codec::decode_op::<TaskListOp>(&stored.payload) {
                    list.apply(op, now);
                }
            }
        }
        lists.insert(list_id, list);
    }

    Ok((registry, lists))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklist_storage::MemoryStorage;

    #[tokio::test]
    async fn hydrates_an_empty_store_into_an_empty_repository() {
        let storage = MemoryStorage::default();
        let (registry, lists) = hydrate(&storage, ActorId::from("a")).await.unwrap();
        assert!(registry.snapshot().is_empty());
        assert!(lists.is_empty());
    }

    #[tokio::test]
    async fn hydrates_a_list_that_only_has_a_snapshot_and_no_registry_entry() {
        let storage = MemoryStorage::default();
        let mut list = TaskListCrdt::new(ActorId::from("a"), "Groceries".into());
        list.generate_insert("t1".into(), "milk".into(), None, None, Utc::now()).unwrap();
        let snapshot = list.encode_snapshot().unwrap();
        storage
            .persist_operations("l1", tasklist_storage::WriteGroup { ops: vec![], snapshot: Some(snapshot) })
            .await
            .unwrap();

        let (_, lists) = hydrate(&storage, ActorId::from("a")).await.unwrap();
        let hydrated = lists.get("l1").unwrap();
        assert_eq!(hydrated.title().get(), "Groceries");
        assert_eq!(hydrated.state().tasks[0].text, "milk");
    }
}
