use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, ensure};
use tasklist_crdt::registry::RegistryEntrySnapshot;
use tasklist_crdt::tasklist::ListState;

use crate::errors::{JsonSnafu, Result, UnsupportedSchemaSnafu};

pub const EXPORT_SCHEMA: &str = "tasklist.export.v1";
pub const EXPORT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedList {
    pub list_id: String,
    pub state: ListState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub registry: Vec<RegistryEntrySnapshot>,
    pub lists: Vec<ExportedList>,
    pub exported_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ExportEnvelope {
    schema: String,
    version: u32,
    data: ExportData,
}

/// `{ok: true, value}` on success, `{ok: false, error}` otherwise — the
/// result shape `parse` is specified to return rather than a bare `Result`,
/// since callers (the CLI, UI layers) are expected to branch on `ok` without
/// unwinding.
#[derive(Clone, Debug)]
pub enum ParseOutcome {
    Ok { value: ExportData },
    Err { error: String },
}

#[derive(Serialize, Deserialize)]
struct ParseOutcomeWire {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    value: Option<ExportData>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    error: Option<String>,
}

impl Serialize for ParseOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = match self {
            ParseOutcome::Ok { value } => ParseOutcomeWire { ok: true, value: Some(value.clone()), error: None },
            ParseOutcome::Err { error } => ParseOutcomeWire { ok: false, value: None, error: Some(error.clone()) },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParseOutcome {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = ParseOutcomeWire::deserialize(deserializer)?;
        if wire.ok {
            let value = wire.value.ok_or_else(|| serde::de::Error::missing_field("value"))?;
            Ok(ParseOutcome::Ok { value })
        } else {
            let error = wire.error.ok_or_else(|| serde::de::Error::missing_field("error"))?;
            Ok(ParseOutcome::Err { error })
        }
    }
}

pub fn build(data: &ExportData) -> Result<String> {
    let envelope = ExportEnvelope {
        schema: EXPORT_SCHEMA.to_string(),
        version: EXPORT_VERSION,
        data: data.clone(),
    };
    serde_json::to_string(&envelope).context(JsonSnafu { action: "encode".to_string() })
}

pub fn parse(json: &str) -> ParseOutcome {
    match parse_checked(json) {
        Ok(data) => ParseOutcome::Ok { value: data },
        Err(err) => ParseOutcome::Err { error: err.to_string() },
    }
}

fn parse_checked(json: &str) -> Result<ExportData> {
    let value: Value = serde_json::from_str(json).context(JsonSnafu { action: "decode".to_string() })?;
    let schema = value
        .get("schema")
        .and_then(Value::as_str)
        .context(UnsupportedSchemaSnafu { schema: String::new(), expected: EXPORT_SCHEMA.to_string() })?;
    ensure!(
        schema == EXPORT_SCHEMA,
        UnsupportedSchemaSnafu { schema: schema.to_string(), expected: EXPORT_SCHEMA.to_string() }
    );
    let envelope: ExportEnvelope = serde_json::from_value(value).context(JsonSnafu { action: "decode".to_string() })?;
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_exactly() {
        let data = ExportData {
            registry: vec![RegistryEntrySnapshot {
                id: "l1".into(),
                title: "Groceries".into(),
                created_at: DateTime::UNIX_EPOCH,
                updated_at: DateTime::UNIX_EPOCH,
            }],
            lists: vec![ExportedList {
                list_id: "l1".into(),
                state: ListState { title: "Groceries".into(), tasks: vec![] },
            }],
            exported_at: DateTime::UNIX_EPOCH,
        };
        let json = build(&data).unwrap();
        match parse(&json) {
            ParseOutcome::Ok { value } => assert_eq!(value, data),
            ParseOutcome::Err { error } => panic!("unexpected parse failure: {error}"),
        }
    }

    #[test]
    fn rejects_wrong_schema() {
        let json = r#"{"schema":"something.else","version":1,"data":{}}"#;
        match parse(json) {
            ParseOutcome::Err { .. } => {}
            ParseOutcome::Ok { .. } => panic!("expected schema mismatch to fail"),
        }
    }
}
