use serde::{Deserialize, Serialize};

use crate::envelope::SyncEnvelope;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub dataset_generation_key: String,
    pub snapshot_blob: Option<String>,
    pub server_seq: u64,
    pub ops: Vec<SyncEnvelope>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub dataset_generation_key: String,
    pub ops: Vec<SyncEnvelope>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub server_seq: u64,
    pub dataset_generation_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub server_seq: u64,
    pub dataset_generation_key: String,
    pub ops: Vec<SyncEnvelope>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub client_id: String,
    pub dataset_generation_key: String,
    pub snapshot_blob: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub dataset_generation_key: String,
    pub server_seq: u64,
}
