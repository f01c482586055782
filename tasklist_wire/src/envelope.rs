use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use tasklist_core::{ActorId, clock::Lamport};

use crate::errors::{JsonSnafu, Result};
use crate::scope::Scope;

/// One operation wrapped for the sync transport. `payload` is whatever JSON
/// the CRDT layer produced for its op (`tasklist_crdt::codec::encode_op`'s
/// output, re-parsed into a `Value` so it nests cleanly here) — the server
/// never looks inside it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    pub scope: Scope,
    pub resource_id: String,
    pub actor: ActorId,
    pub clock: Lamport,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_seq: Option<u64>,
}

pub type DedupeKey = (ActorId, Lamport, Scope, String);

impl SyncEnvelope {
    pub fn dedupe_key(&self) -> DedupeKey {
        (self.actor.clone(), self.clock, self.scope, self.resource_id.clone())
    }
}

/// Serialise a decoded op (already `Serialize`) into an envelope's `payload`.
pub fn encode_payload<T: Serialize>(op: &T) -> Result<Value> {
    serde_json::to_value(op).context(JsonSnafu { action: "encode".to_string() })
}

pub fn decode_payload<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone()).context(JsonSnafu { action: "decode".to_string() })
}
