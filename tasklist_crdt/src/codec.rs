use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, ensure};
use tasklist_core::{Position, clock::Lamport};

use crate::entry::Entry;
use crate::errors::{CodecSnafu, Result, UnsupportedSchemaSnafu};
use crate::payload::Payload;

pub const SNAPSHOT_SCHEMA: &str = "tasklist.snapshot.v1";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Versioned wrapper every persisted or wired payload is carried in, so a
/// future format change can be detected before `data` is even touched.
#[derive(Serialize, Deserialize)]
pub struct Envelope<T> {
    pub schema: String,
    pub version: u32,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(schema: &str, version: u32, data: T) -> Self {
        Self { schema: schema.to_string(), version, data }
    }

    pub fn expect_schema(&self, expected: &str) -> Result<()> {
        ensure!(
            self.schema == expected,
            UnsupportedSchemaSnafu {
                schema: self.schema.clone(),
                expected: expected.to_string(),
            }
        );
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntryWire {
    id: String,
    pos: Position,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    deleted_at: Option<Lamport>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotWire {
    clock: Lamport,
    entries: Vec<SnapshotEntryWire>,
}

/// Build the entries portion of a snapshot as a bare JSON `Value`, for
/// callers (like a task list) that need to nest it inside a larger envelope
/// alongside other fields.
pub fn encode_entries_value<P: Payload>(clock: Lamport, entries: &[&Entry<P>]) -> Result<Value> {
    let wire = SnapshotWire {
        clock,
        entries: entries
            .iter()
            .map(|entry| {
                Ok(SnapshotEntryWire {
                    id: entry.id.clone(),
                    pos: entry.pos.clone(),
                    data: serde_json::to_value(&entry.data).context(CodecSnafu { action: "encode".to_string() })?,
                    created_at: entry.created_at,
                    updated_at: entry.updated_at,
                    deleted_at: entry.deleted_at,
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };
    serde_json::to_value(wire).context(CodecSnafu { action: "encode".to_string() })
}

/// Decode the entries portion built by [`encode_entries_value`], dropping
/// any entry whose id is empty or whose payload fails to deserialise rather
/// than failing the whole decode.
pub fn decode_entries_value<P: Payload>(value: Value) -> Result<(Lamport, Vec<Entry<P>>)> {
    let wire: SnapshotWire = serde_json::from_value(value).context(CodecSnafu { action: "decode".to_string() })?;
    let clock = wire.clock;
    let entries = wire
        .entries
        .into_iter()
        .filter(|e| !e.id.is_empty())
        .filter_map(|e| {
            let data: P = serde_json::from_value(e.data).ok()?;
            Some(Entry {
                id: e.id,
                pos: e.pos,
                pos_clock: clock,
                data,
                created_at: e.created_at,
                updated_at: e.updated_at,
                deleted_at: e.deleted_at,
            })
        })
        .collect();

    Ok((clock, entries))
}

/// Encode a snapshot of every known entry (live and tombstoned — a replica
/// rehydrating from this must still know what was deleted).
pub fn encode_snapshot<P: Payload>(clock: Lamport, entries: &[&Entry<P>]) -> Result<String> {
    let value = encode_entries_value(clock, entries)?;
    wrap_envelope(SNAPSHOT_SCHEMA, SNAPSHOT_VERSION, &value)
}

/// Decode a snapshot, dropping any entry whose id is empty or whose payload
/// fails to deserialise rather than failing the whole decode.
pub fn decode_snapshot<P: Payload>(json: &str) -> Result<(Lamport, Vec<Entry<P>>)> {
    let value: Value = unwrap_envelope(json, SNAPSHOT_SCHEMA)?;
    decode_entries_value(value)
}

pub fn wrap_envelope<T: Serialize>(schema: &str, version: u32, data: &T) -> Result<String> {
    let envelope = Envelope::new(schema, version, data);
    serde_json::to_string(&envelope).context(CodecSnafu { action: "encode".to_string() })
}

pub fn unwrap_envelope<T: for<'de> Deserialize<'de>>(json: &str, expected_schema: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_str(json).context(CodecSnafu { action: "decode".to_string() })?;
    envelope.expect_schema(expected_schema)?;
    Ok(envelope.data)
}

pub const TASK_LIST_SCHEMA: &str = "tasklist.list_snapshot.v1";
pub const TASK_LIST_VERSION: u32 = 1;

pub const OP_SCHEMA: &str = "tasklist.op.v1";
pub const OP_VERSION: u32 = 1;

pub fn encode_op<O: Serialize>(op: &O) -> Result<String> {
    let envelope = Envelope::new(OP_SCHEMA, OP_VERSION, op);
    serde_json::to_string(&envelope).context(CodecSnafu { action: "encode".to_string() })
}

pub fn decode_op<O: for<'de> Deserialize<'de>>(json: &str) -> Result<O> {
    let envelope: Envelope<O> = serde_json::from_str(json).context(CodecSnafu { action: "decode".to_string() })?;
    envelope.expect_schema(OP_SCHEMA)?;
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordered_set::{Op, OrderedSet};
    use crate::tasklist::{TaskListCrdt, TaskListOp};
    use chrono::DateTime;
    use tasklist_core::ActorId;

    fn now() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut list = TaskListCrdt::new(ActorId::from("a"), "Groceries".into());
        list.generate_insert("t1".into(), "milk".into(), None, None, now()).unwrap();
        list.generate_insert("t2".into(), "eggs".into(), Some("t1"), None, now()).unwrap();

        let entries: Vec<_> = list.inner().snapshot();
        let json = encode_snapshot(list.inner().clock(), &entries).unwrap();
        let (clock, decoded) = decode_snapshot::<crate::tasklist::TaskPayload>(&json).unwrap();
        assert_eq!(clock, list.inner().clock());
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn decode_drops_entries_with_empty_id() {
        let json = format!(
            r#"{{"schema":"{SNAPSHOT_SCHEMA}","version":1,"data":{{"clock":1,"entries":[{{"id":"","pos":[],"data":{{}},"createdAt":"1970-01-01T00:00:00Z","updatedAt":"1970-01-01T00:00:00Z"}}]}}}}"#
        );
        let (_, entries) = decode_snapshot::<crate::registry::RegistryPayload>(&json).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn op_round_trips_and_omits_unset_partial_fields() {
        let mut set: OrderedSet<crate::registry::RegistryPayload> = OrderedSet::new(ActorId::from("a"));
        let op = set
            .generate_insert(
                "l1".into(),
                crate::registry::RegistryPartial { title: Some("Groceries".into()) },
                None,
                None,
                now(),
            )
            .unwrap();
        let json = encode_op(&op).unwrap();
        assert!(!json.contains("null"));
        let decoded: Op<crate::registry::RegistryPayload> = decode_op(&json).unwrap();
        assert_eq!(decoded.id(), "l1");
    }

    #[test]
    fn rename_op_round_trips() {
        let mut list = TaskListCrdt::new(ActorId::from("a"), "old".into());
        let (op, _) = list.generate_rename("new".into());
        let json = encode_op(&op).unwrap();
        let decoded: TaskListOp = decode_op(&json).unwrap();
        matches!(decoded, TaskListOp::Rename(_));
    }
}
