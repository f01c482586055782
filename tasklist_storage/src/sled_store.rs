use std::path::Path;

use async_trait::async_trait;
use snafu::ResultExt;
use tasklist_core::ActorId;
use tasklist_core::clock::Lamport;

use crate::adapter::StorageAdapter;
use crate::errors::{BackendSnafu, CodecSnafu, Result};
use crate::types::{ListRecord, Outbox, RegistryRecord, SyncState, WriteGroup, dedupe_ops};

const REGISTRY_KEY: &[u8] = b"registry";
const SYNC_STATE_KEY: &[u8] = b"sync_state";
const OUTBOX_KEY: &[u8] = b"outbox";
const ACTOR_ID_KEY: &[u8] = b"actor_id";

/// Durable `StorageAdapter` over `sled`. Each scope (a list, the registry,
/// sync state, the outbox) is one key holding its whole record as JSON, so
/// every write this adapter makes is a single `sled` insert — already
/// atomic, with no need for a multi-key transaction to keep a snapshot and
/// its op log consistent.
pub struct SledStorage {
    lists: sled::Tree,
    registry: sled::Tree,
    sync_state: sled::Tree,
    outbox: sled::Tree,
    identity: sled::Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).context(BackendSnafu)?;
        Ok(Self {
            lists: db.open_tree("list_states").context(BackendSnafu)?,
            registry: db.open_tree("registry_state").context(BackendSnafu)?,
            sync_state: db.open_tree("sync_state").context(BackendSnafu)?,
            outbox: db.open_tree("sync_outbox").context(BackendSnafu)?,
            identity: db.open_tree("device_identity").context(BackendSnafu)?,
        })
    }

    fn get_list(&self, list_id: &str) -> Result<Option<ListRecord>> {
        match self.lists.get(list_id.as_bytes()).context(BackendSnafu)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).context(CodecSnafu)?)),
            None => Ok(None),
        }
    }

    fn put_list(&self, record: &ListRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record).context(CodecSnafu)?;
        self.lists.insert(record.list_id.as_bytes(), bytes).context(BackendSnafu)?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SledStorage {
    async fn load_all_lists(&self) -> Result<Vec<ListRecord>> {
        self.lists
            .iter()
            .values()
            .map(|bytes| {
                let bytes = bytes.context(BackendSnafu)?;
                serde_json::from_slice(&bytes).context(CodecSnafu)
            })
            .collect()
    }

    async fn load_list(&self, list_id: &str) -> Result<Option<ListRecord>> {
        self.get_list(list_id)
    }

    async fn load_registry(&self) -> Result<RegistryRecord> {
        match self.registry.get(REGISTRY_KEY).context(BackendSnafu)? {
            Some(bytes) => serde_json::from_slice(&bytes).context(CodecSnafu),
            None => Ok(RegistryRecord::default()),
        }
    }

    async fn persist_operations(&self, list_id: &str, group: WriteGroup) -> Result<()> {
        let mut record = self.get_list(list_id)?.unwrap_or_else(|| ListRecord {
            list_id: list_id.to_string(),
            ..Default::default()
        });
        if let Some(snapshot) = group.snapshot {
            record.state = Some(snapshot);
            record.operations = group.ops;
        } else {
            dedupe_ops(&mut record.operations, group.ops);
        }
        self.put_list(&record)
    }

    async fn persist_registry(&self, group: WriteGroup) -> Result<()> {
        let mut record: RegistryRecord = self
            .registry
            .get(REGISTRY_KEY)
            .context(BackendSnafu)?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .context(CodecSnafu)?
            .unwrap_or_default();
        if let Some(snapshot) = group.snapshot {
            record.state = Some(snapshot);
            record.operations = group.ops;
        } else {
            dedupe_ops(&mut record.operations, group.ops);
        }
        let bytes = serde_json::to_vec(&record).context(CodecSnafu)?;
        self.registry.insert(REGISTRY_KEY, bytes).context(BackendSnafu)?;
        Ok(())
    }

    async fn prune_operations(&self, list_id: &str, before_clock: Lamport) -> Result<()> {
        if let Some(mut record) = self.get_list(list_id)? {
            record.operations.retain(|op| op.clock >= before_clock);
            self.put_list(&record)?;
        }
        Ok(())
    }

    async fn prune_registry_operations(&self, before_clock: Lamport) -> Result<()> {
        let mut record: RegistryRecord = match self.registry.get(REGISTRY_KEY).context(BackendSnafu)? {
            Some(bytes) => serde_json::from_slice(&bytes).context(CodecSnafu)?,
            None => return Ok(()),
        };
        record.operations.retain(|op| op.clock >= before_clock);
        let bytes = serde_json::to_vec(&record).context(CodecSnafu)?;
        self.registry.insert(REGISTRY_KEY, bytes).context(BackendSnafu)?;
        Ok(())
    }

    async fn load_sync_state(&self) -> Result<Option<SyncState>> {
        match self.sync_state.get(SYNC_STATE_KEY).context(BackendSnafu)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).context(CodecSnafu)?)),
            None => Ok(None),
        }
    }

    async fn persist_sync_state(&self, state: SyncState) -> Result<()> {
        let bytes = serde_json::to_vec(&state).context(CodecSnafu)?;
        self.sync_state.insert(SYNC_STATE_KEY, bytes).context(BackendSnafu)?;
        Ok(())
    }

    async fn load_outbox(&self) -> Result<Outbox> {
        match self.outbox.get(OUTBOX_KEY).context(BackendSnafu)? {
            Some(bytes) => serde_json::from_slice(&bytes).context(CodecSnafu),
            None => Ok(Vec::new()),
        }
    }

    async fn persist_outbox(&self, outbox: Outbox) -> Result<()> {
        let bytes = serde_json::to_vec(&outbox).context(CodecSnafu)?;
        self.outbox.insert(OUTBOX_KEY, bytes).context(BackendSnafu)?;
        Ok(())
    }

    async fn load_actor_id(&self) -> Result<Option<ActorId>> {
        match self.identity.get(ACTOR_ID_KEY).context(BackendSnafu)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).context(CodecSnafu)?)),
            None => Ok(None),
        }
    }

    async fn persist_actor_id(&self, actor: ActorId) -> Result<()> {
        let bytes = serde_json::to_vec(&actor).context(CodecSnafu)?;
        self.identity.insert(ACTOR_ID_KEY, bytes).context(BackendSnafu)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.lists.clear().context(BackendSnafu)?;
        self.registry.clear().context(BackendSnafu)?;
        self.sync_state.clear().context(BackendSnafu)?;
        self.outbox.clear().context(BackendSnafu)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoredOp;
    use tasklist_core::ActorId;

    #[tokio::test]
    async fn persists_and_reloads_across_a_fresh_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = SledStorage::open(dir.path()).unwrap();
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
        }
        let storage = SledStorage::open(dir.path()).unwrap();
        let record = storage.load_list("l1").await.unwrap().unwrap();
        assert_eq!(record.operations.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_write_purges_prior_operations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();
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
        storage
            .persist_operations("l1", WriteGroup { ops: vec![], snapshot: Some("snap".into()) })
            .await
            .unwrap();
        let record = storage.load_list("l1").await.unwrap().unwrap();
        assert_eq!(record.state.as_deref(), Some("snap"));
        assert!(record.operations.is_empty());
    }

    #[tokio::test]
    async fn actor_id_persists_across_a_fresh_open_and_survives_clear() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = SledStorage::open(dir.path()).unwrap();
            assert!(storage.load_actor_id().await.unwrap().is_none());
            storage.persist_actor_id(ActorId::from("device-a")).await.unwrap();
            storage.clear().await.unwrap();
        }
        let storage = SledStorage::open(dir.path()).unwrap();
        assert_eq!(storage.load_actor_id().await.unwrap(), Some(ActorId::from("device-a")));
    }
}
