use std::collections::HashMap;

use async_trait::async_trait;
use tasklist_core::ActorId;
use tasklist_core::clock::Lamport;
use tokio::sync::Mutex;

use crate::adapter::StorageAdapter;
use crate::errors::Result;
use crate::types::{ListRecord, Outbox, RegistryRecord, SyncState, WriteGroup, dedupe_ops};

#[derive(Default)]
struct Inner {
    lists: HashMap<String, ListRecord>,
    registry: RegistryRecord,
    sync_state: Option<SyncState>,
    outbox: Outbox,
}

/// Reference `StorageAdapter` backed by an in-process mutex, satisfying the
/// same transactional properties as the durable backend (§6: "a test memory
/// implementation must satisfy the same transactional properties").
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    actor_id: Mutex<Option<ActorId>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn load_all_lists(&self) -> Result<Vec<ListRecord>> {
        Ok(self.inner.lock().await.lists.values().cloned().collect())
    }

    async fn load_list(&self, list_id: &str) -> Result<Option<ListRecord>> {
        Ok(self.inner.lock().await.lists.get(list_id).cloned())
    }

    async fn load_registry(&self) -> Result<RegistryRecord> {
        Ok(self.inner.lock().await.registry.clone())
    }

    async fn persist_operations(&self, list_id: &str, group: WriteGroup) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner.lists.entry(list_id.to_string()).or_insert_with(|| ListRecord {
            list_id: list_id.to_string(),
            ..Default::default()
        });
        if let Some(snapshot) = group.snapshot {
            record.state = Some(snapshot);
            record.operations = group.ops;
        } else {
            dedupe_ops(&mut record.operations, group.ops);
        }
        Ok(())
    }

    async fn persist_registry(&self, group: WriteGroup) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(snapshot) = group.snapshot {
            inner.registry.state = Some(snapshot);
            inner.registry.operations = group.ops;
        } else {
            dedupe_ops(&mut inner.registry.operations, group.ops);
        }
        Ok(())
    }

    async fn prune_operations(&self, list_id: &str, before_clock: Lamport) -> Result<()> {
        if let Some(record) = self.inner.lock().await.lists.get_mut(list_id) {
            record.operations.retain(|op| op.clock >= before_clock);
        }
        Ok(())
    }

    async fn prune_registry_operations(&self, before_clock: Lamport) -> Result<()> {
        self.inner.lock().await.registry.operations.retain(|op| op.clock >= before_clock);
        Ok(())
    }

    async fn load_sync_state(&self) -> Result<Option<SyncState>> {
        Ok(self.inner.lock().await.sync_state.clone())
    }

    async fn persist_sync_state(&self, state: SyncState) -> Result<()> {
        self.inner.lock().await.sync_state = Some(state);
        Ok(())
    }

    async fn load_outbox(&self) -> Result<Outbox> {
        Ok(self.inner.lock().await.outbox.clone())
    }

    async fn persist_outbox(&self, outbox: Outbox) -> Result<()> {
        self.inner.lock().await.outbox = outbox;
        Ok(())
    }

    async fn load_actor_id(&self) -> Result<Option<ActorId>> {
        Ok(self.actor_id.lock().await.clone())
    }

    async fn persist_actor_id(&self, actor: ActorId) -> Result<()> {
        *self.actor_id.lock().await = Some(actor);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.inner.lock().await = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoredOp;
    use tasklist_core::ActorId;

    #[tokio::test]
    async fn snapshot_write_purges_prior_operations() {
        let storage = MemoryStorage::new();
        storage
            .persist_operations(
                "l1",
                WriteGroup {
                    ops: vec![StoredOp { clock: Lamport::new(1), actor: ActorId::from("a"), payload: "{}".into() }],
                    snapshot: None,
                },
            )
            .await
            .unwrap();
        let record = storage.load_list("l1").await.unwrap().unwrap();
        assert_eq!(record.operations.len(), 1);

        storage
            .persist_operations("l1", WriteGroup { ops: vec![], snapshot: Some("snap".into()) })
            .await
            .unwrap();
        let record = storage.load_list("l1").await.unwrap().unwrap();
        assert_eq!(record.state.as_deref(), Some("snap"));
        assert!(record.operations.is_empty());
    }

    #[tokio::test]
    async fn clear_resets_every_store() {
        let storage = MemoryStorage::new();
        storage
            .persist_sync_state(SyncState { client_id: "device-a".into(), last_server_seq: 5, dataset_generation_key: "g".into() })
            .await
            .unwrap();
        storage.clear().await.unwrap();
        assert!(storage.load_sync_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn actor_id_round_trips_and_survives_a_clear() {
        let storage = MemoryStorage::new();
        assert!(storage.load_actor_id().await.unwrap().is_none());

        storage.persist_actor_id(ActorId::from("device-a")).await.unwrap();
        assert_eq!(storage.load_actor_id().await.unwrap(), Some(ActorId::from("device-a")));

        storage.clear().await.unwrap();
        assert_eq!(storage.load_actor_id().await.unwrap(), Some(ActorId::from("device-a")));
    }
}
