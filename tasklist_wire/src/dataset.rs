use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::errors::{JsonSnafu, Result};

/// The raw CRDT-level snapshot blob carried over the wire by `bootstrap`
/// and `reset` (§4.9) — the registry's own snapshot plus one snapshot per
/// list, keyed by list id. Distinct from [`crate::export`], which is the
/// human-portable dump with decoded entry data rather than opaque codec
/// strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSnapshot {
    pub registry_state: String,
    pub lists: HashMap<String, String>,
}

impl DatasetSnapshot {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context(JsonSnafu { action: "encode".to_string() })
    }

    pub fn decode(json: &str) -> Result<Self> {
        serde_json::from_str(json).context(JsonSnafu { action: "decode".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let snapshot = DatasetSnapshot {
            registry_state: "{}".to_string(),
            lists: HashMap::from([("l1".to_string(), "{}".to_string())]),
        };
        let json = snapshot.encode().unwrap();
        assert_eq!(DatasetSnapshot::decode(&json).unwrap(), snapshot);
    }
}
