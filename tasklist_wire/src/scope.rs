use serde::{Deserialize, Serialize};

/// Which kind of CRDT instance an envelope's operation targets. Combined
/// with `resource_id` (the list id, or a fixed constant for the registry)
/// this identifies one CRDT; the payload itself stays opaque to the server
/// (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Registry,
    List,
}

/// Fixed `resourceId` used for registry-scoped envelopes, which have no
/// list id of their own.
pub const REGISTRY_RESOURCE_ID: &str = "registry";
