use async_trait::async_trait;
use tasklist_core::ActorId;
use tasklist_core::clock::Lamport;

use crate::errors::Result;
use crate::types::{ListRecord, Outbox, RegistryRecord, SyncState, WriteGroup};

/// Transactional key-value storage, scoped per list, per the registry, or
/// per sync state (§4.5). All operations are asynchronous; callers never
/// observe a partial write (reads see a consistent snapshot of one
/// transaction, and a snapshot-replacing write purges its op log in the
/// same atomic group).
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn load_all_lists(&self) -> Result<Vec<ListRecord>>;
    async fn load_list(&self, list_id: &str) -> Result<Option<ListRecord>>;
    async fn load_registry(&self) -> Result<RegistryRecord>;

    /// Append `group.ops`, and if `group.snapshot` is set, atomically
    /// replace the stored snapshot and drop every previously persisted op
    /// for this list in the same write.
    async fn persist_operations(&self, list_id: &str, group: WriteGroup) -> Result<()>;
    async fn persist_registry(&self, group: WriteGroup) -> Result<()>;

    async fn prune_operations(&self, list_id: &str, before_clock: Lamport) -> Result<()>;
    async fn prune_registry_operations(&self, before_clock: Lamport) -> Result<()>;

    async fn load_sync_state(&self) -> Result<Option<SyncState>>;
    async fn persist_sync_state(&self, state: SyncState) -> Result<()>;

    async fn load_outbox(&self) -> Result<Outbox>;
    async fn persist_outbox(&self, outbox: Outbox) -> Result<()>;

    /// This device's stable actor id, generated and persisted once on first
    /// run. Outside the scope `clear()` resets: a dataset-generation reset
    /// replaces the data this device has synced, not the device's own
    /// identity.
    async fn load_actor_id(&self) -> Result<Option<ActorId>>;
    async fn persist_actor_id(&self, actor: ActorId) -> Result<()>;

    /// Reset every store; used on dataset-generation reset (§4.9 step 4).
    /// Does not affect the actor id.
    async fn clear(&self) -> Result<()>;
}
