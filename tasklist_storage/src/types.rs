use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasklist_core::{ActorId, clock::Lamport};
use tasklist_wire::SyncEnvelope;

/// One persisted operation, keyed by `(clock, actor)` within its list or the
/// registry so a retried write is idempotent (§4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredOp {
    pub clock: Lamport,
    pub actor: ActorId,
    /// JSON produced by `tasklist_crdt::codec::encode_op`.
    pub payload: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    pub list_id: String,
    /// JSON snapshot (`tasklist_crdt::codec::encode_snapshot`), absent if
    /// the list has never been snapshotted.
    pub state: Option<String>,
    pub operations: Vec<StoredOp>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub state: Option<String>,
    pub operations: Vec<StoredOp>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub client_id: String,
    pub last_server_seq: u64,
    pub dataset_generation_key: String,
}

/// A write group for `persistOperations`/`persistRegistry`: when `snapshot`
/// is set the write atomically replaces the stored snapshot *and* drops
/// every previously persisted operation for that scope.
#[derive(Clone, Debug, Default)]
pub struct WriteGroup {
    pub ops: Vec<StoredOp>,
    pub snapshot: Option<String>,
}

pub(crate) fn dedupe_ops(existing: &mut Vec<StoredOp>, incoming: Vec<StoredOp>) {
    for op in incoming {
        if let Some(slot) = existing.iter_mut().find(|o| o.clock == op.clock && o.actor == op.actor) {
            *slot = op;
        } else {
            existing.push(op);
        }
    }
}

pub type Outbox = Vec<SyncEnvelope>;
