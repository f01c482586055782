use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use tasklist_repository::Repository;
use tasklist_storage::{StorageAdapter, SyncState};
use tasklist_wire::protocol::{BootstrapResponse, PullResponse, PushRequest, PushResponse, ResetRequest, ResetResponse};
use tasklist_wire::{DatasetSnapshot, SyncEnvelope};

use crate::errors::{DatasetSnafu, MissingClientIdSnafu, RepositorySnafu, Result, StatusSnafu, StorageSnafu, TransportSnafu};

/// Handler invoked with each freshly-applied batch of remote operations,
/// after the repository has already applied them (§4.9 step 3).
pub type RemoteOpsHandler = Arc<dyn Fn(&[SyncEnvelope]) + Send + Sync>;

pub struct SyncEngineConfig {
    pub base_url: String,
    pub client_id: String,
    pub poll_interval: Duration,
    pub on_remote_ops: Option<RemoteOpsHandler>,
}

impl SyncEngineConfig {
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client_id: client_id.into(), poll_interval: Duration::from_secs(3), on_remote_ops: None }
    }
}

/// Bridges a [`Repository`] to a remote HTTP+JSON sync server (§4.9). Holds
/// no CRDT state of its own: `clientId`, `lastServerSeq` and
/// `datasetGenerationKey` are durably persisted through `SyncState` rather
/// than kept only in `SyncEngineConfig`, and the outbox lives entirely in
/// storage so the repository can keep appending to it without coordinating
/// with the engine in memory (§5).
pub struct SyncEngine<S: StorageAdapter> {
    http: reqwest::Client,
    storage: Arc<S>,
    repository: Arc<Repository<S>>,
    config: SyncEngineConfig,
    /// Serialises `sync_once` against itself: polling and a manually
    /// triggered sync never run concurrently on one engine instance.
    lock: Mutex<()>,
}

impl<S: StorageAdapter + 'static> SyncEngine<S> {
    pub fn new(storage: Arc<S>, repository: Arc<Repository<S>>, config: SyncEngineConfig) -> Result<Self> {
        snafu::ensure!(!config.client_id.is_empty(), MissingClientIdSnafu);
        Ok(Self { http: reqwest::Client::new(), storage, repository, config, lock: Mutex::new(()) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Bootstraps from the server: fetches the current dataset generation,
    /// applies a snapshot (if the server has one) or replays bundled ops,
    /// and records `lastServerSeq`/`datasetGenerationKey`. A failure here
    /// leaves the engine unarmed — `sync_once` will retry bootstrap on its
    /// next call — but the repository stays fully usable offline.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.bootstrap().await
    }

    async fn bootstrap(&self) -> Result<()> {
        let url = self.url(&format!("/sync/bootstrap?clientId={}", self.config.client_id));
        let response = self.http.get(&url).send().await.context(TransportSnafu { url: url.clone() })?;
        snafu::ensure!(response.status().is_success(), StatusSnafu { url: url.clone(), status: response.status() });
        let body: BootstrapResponse = response.json().await.context(TransportSnafu { url: url.clone() })?;

        if let Some(blob) = &body.snapshot_blob {
            let snapshot = DatasetSnapshot::decode(blob).context(DatasetSnafu)?;
            self.repository
                .replace_with_snapshot(&snapshot.registry_state, snapshot.lists)
                .await
                .context(RepositorySnafu)?;
        }
        if !body.ops.is_empty() {
            self.repository.apply_remote_ops(body.ops.clone()).await.context(RepositorySnafu)?;
            self.notify_remote_ops(&body.ops);
        }

        self.storage
            .persist_sync_state(SyncState {
                client_id: self.config.client_id.clone(),
                last_server_seq: body.server_seq,
                dataset_generation_key: body.dataset_generation_key,
            })
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    fn notify_remote_ops(&self, ops: &[SyncEnvelope]) {
        if let Some(handler) = &self.config.on_remote_ops {
            handler(ops);
        }
    }

    async fn sync_state(&self) -> Result<SyncState> {
        let mut state = self.storage.load_sync_state().await.context(StorageSnafu)?.unwrap_or_default();
        if state.client_id.is_empty() {
            state.client_id = self.config.client_id.clone();
        }
        Ok(state)
    }

    /// Runs one push-then-pull cycle (§4.9 steps 1-3), resetting local state
    /// if the server reports a new dataset generation (step 4). Transport
    /// and storage failures are logged and swallowed — the caller always
    /// gets `Ok(())` back except for hard configuration errors, matching the
    /// "retried on the next tick" failure semantics (§7).
    pub async fn sync_once(&self) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut sync_state = self.sync_state().await?;
        if sync_state.dataset_generation_key.is_empty() {
            if let Err(err) = self.bootstrap().await {
                log::warn!("sync bootstrap failed, will retry next tick: {err}");
                return Ok(());
            }
            sync_state = self.sync_state().await?;
        }

        if let Err(err) = self.push(&mut sync_state).await {
            log::warn!("sync push failed, will retry next tick: {err}");
            return Ok(());
        }
        if let Err(err) = self.pull(&mut sync_state).await {
            log::warn!("sync pull failed, will retry next tick: {err}");
        }
        Ok(())
    }

    async fn push(&self, sync_state: &mut SyncState) -> Result<()> {
        let outbox = self.storage.load_outbox().await.context(StorageSnafu)?;
        if outbox.is_empty() {
            return Ok(());
        }

        let url = self.url("/sync/push");
        let request = PushRequest { client_id: self.config.client_id.clone(), dataset_generation_key: sync_state.dataset_generation_key.clone(), ops: outbox.clone() };
        let response = self.http.post(&url).json(&request).send().await.context(TransportSnafu { url: url.clone() })?;
        snafu::ensure!(response.status().is_success(), StatusSnafu { url: url.clone(), status: response.status() });
        let body: PushResponse = response.json().await.context(TransportSnafu { url: url.clone() })?;

        // The outbox may have grown while this request was in flight; drop
        // only the envelopes we actually pushed, identified by dedupe key,
        // rather than overwriting with an empty outbox.
        let pushed: HashSet<_> = outbox.iter().map(SyncEnvelope::dedupe_key).collect();
        let remaining = self.storage.load_outbox().await.context(StorageSnafu)?;
        let remaining: Vec<_> = remaining.into_iter().filter(|env| !pushed.contains(&env.dedupe_key())).collect();
        self.storage.persist_outbox(remaining).await.context(StorageSnafu)?;

        if body.dataset_generation_key != sync_state.dataset_generation_key {
            self.reset_to(body.dataset_generation_key.clone()).await?;
            sync_state.dataset_generation_key = body.dataset_generation_key;
            sync_state.last_server_seq = self.sync_state().await?.last_server_seq;
            return Ok(());
        }

        sync_state.last_server_seq = sync_state.last_server_seq.max(body.server_seq);
        self.storage.persist_sync_state(sync_state.clone()).await.context(StorageSnafu)?;
        Ok(())
    }

    async fn pull(&self, sync_state: &mut SyncState) -> Result<()> {
        let url = self.url(&format!(
            "/sync/pull?clientId={}&since={}&datasetGenerationKey={}",
            self.config.client_id, sync_state.last_server_seq, sync_state.dataset_generation_key
        ));
        let response = self.http.get(&url).send().await.context(TransportSnafu { url: url.clone() })?;
        snafu::ensure!(response.status().is_success(), StatusSnafu { url: url.clone(), status: response.status() });
        let body: PullResponse = response.json().await.context(TransportSnafu { url: url.clone() })?;

        if body.dataset_generation_key != sync_state.dataset_generation_key {
            self.reset_to(body.dataset_generation_key).await?;
            return Ok(());
        }

        if !body.ops.is_empty() {
            self.repository.apply_remote_ops(body.ops.clone()).await.context(RepositorySnafu)?;
            self.notify_remote_ops(&body.ops);
        }
        sync_state.last_server_seq = body.server_seq;
        self.storage.persist_sync_state(sync_state.clone()).await.context(StorageSnafu)?;
        Ok(())
    }

    /// Dataset-generation reset (§4.9 step 4): clear the outbox and local
    /// storage, rehydrate from a fresh bootstrap carrying the new
    /// generation's snapshot. `replace_with_snapshot` fires the registry
    /// event the repository's subscribers see this through (E5), rather than
    /// surfacing the transition as a normal remote-ops batch.
    async fn reset_to(&self, _new_generation: String) -> Result<()> {
        self.storage.persist_outbox(Vec::new()).await.context(StorageSnafu)?;
        self.bootstrap().await
    }

    /// Publishes the entire local dataset as the new server-side
    /// generation, for the "this device's data wins" recovery path. Not
    /// part of the regular poll cycle.
    pub async fn push_full_reset(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let sync_state = self.sync_state().await?;
        let (registry_state, lists) = self.repository.build_dataset_snapshot().await.context(RepositorySnafu)?;
        let snapshot = DatasetSnapshot { registry_state, lists };
        let blob = snapshot.encode().context(DatasetSnafu)?;

        let url = self.url("/sync/reset");
        let request = ResetRequest { client_id: self.config.client_id.clone(), dataset_generation_key: sync_state.dataset_generation_key, snapshot_blob: blob };
        let response = self.http.post(&url).json(&request).send().await.context(TransportSnafu { url: url.clone() })?;
        snafu::ensure!(response.status().is_success(), StatusSnafu { url: url.clone(), status: response.status() });
        let body: ResetResponse = response.json().await.context(TransportSnafu { url: url.clone() })?;

        self.storage
            .persist_sync_state(SyncState {
                client_id: self.config.client_id.clone(),
                last_server_seq: body.server_seq,
                dataset_generation_key: body.dataset_generation_key,
            })
            .await
            .context(StorageSnafu)?;
        self.storage.persist_outbox(Vec::new()).await.context(StorageSnafu)?;
        Ok(())
    }

    /// Spawns a timer-driven loop calling `sync_once` at the configured
    /// interval. Polling and any directly-invoked `sync_once` share the same
    /// lock, so they never run concurrently against one engine instance.
    pub fn spawn_polling(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.poll_interval);
            loop {
                ticker.tick().await;
                if let Err(err) = engine.sync_once().await {
                    log::warn!("sync tick failed: {err}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tasklist_repository::Event;
    use tasklist_storage::MemoryStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn engine_with(server: &MockServer) -> (Arc<Repository<MemoryStorage>>, SyncEngine<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let repository = Arc::new(Repository::new(storage.clone(), tasklist_core::ActorId::from("device-a")));
        repository.initialize().await.unwrap();
        let config = SyncEngineConfig::new(server.uri(), "device-a");
        let engine = SyncEngine::new(storage, repository.clone(), config).unwrap();
        (repository, engine)
    }

    #[tokio::test]
    async fn refuses_to_construct_without_a_client_id() {
        let storage = Arc::new(MemoryStorage::default());
        let repository = Repository::new(storage.clone(), tasklist_core::ActorId::from("a"));
        repository.initialize().await.unwrap();
        let config = SyncEngineConfig::new("http://localhost", "");
        assert!(SyncEngine::new(storage, Arc::new(repository), config).is_err());
    }

    #[tokio::test]
    async fn bootstrap_applies_a_snapshot_blob_and_records_sync_state() {
        let server = MockServer::start().await;
        let (repository, engine) = engine_with(&server).await;

        let mut other = tasklist_crdt::tasklist::TaskListCrdt::new(tasklist_core::ActorId::from("seed"), "Groceries".into());
        other.generate_insert("t1".into(), "milk".into(), None, None, chrono::Utc::now()).unwrap();
        let list_snapshot = other.encode_snapshot().unwrap();
        let registry_state = tasklist_crdt::registry::RegistryCrdt::new(tasklist_core::ActorId::from("seed")).encode_snapshot().unwrap();
        let dataset = DatasetSnapshot { registry_state, lists: std::collections::HashMap::from([("l1".to_string(), list_snapshot)]) };

        Mock::given(method("GET"))
            .and(path("/sync/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasetGenerationKey": "gen-1",
                "snapshotBlob": dataset.encode().unwrap(),
                "serverSeq": 7,
                "ops": [],
            })))
            .mount(&server)
            .await;

        engine.initialize().await.unwrap();

        let state = repository.get_list_state("l1").await.unwrap();
        assert_eq!(state.title, "Groceries");
        assert_eq!(state.tasks[0].text, "milk");
    }

    #[tokio::test]
    async fn sync_once_pushes_the_outbox_and_drains_it_on_success() {
        let server = MockServer::start().await;
        let (repository, engine) = engine_with(&server).await;

        Mock::given(method("GET"))
            .and(path("/sync/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasetGenerationKey": "gen-1",
                "snapshotBlob": null,
                "serverSeq": 0,
                "ops": [],
            })))
            .mount(&server)
            .await;
        engine.initialize().await.unwrap();

        repository.create_list("l1", "Groceries", None, None).await.unwrap();

        let push_calls = Arc::new(AtomicUsize::new(0));
        let counter = push_calls.clone();
        Mock::given(method("POST"))
            .and(path("/sync/push"))
            .respond_with(move |_: &wiremock::Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(json!({"serverSeq": 1, "datasetGenerationKey": "gen-1"}))
            })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sync/pull"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"serverSeq": 1, "datasetGenerationKey": "gen-1", "ops": []})))
            .mount(&server)
            .await;

        engine.sync_once().await.unwrap();
        assert_eq!(push_calls.load(Ordering::SeqCst), 1);

        let storage = &engine.storage;
        assert!(storage.load_outbox().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dataset_generation_mismatch_triggers_a_reset_via_bootstrap() {
        let server = MockServer::start().await;
        let (repository, engine) = engine_with(&server).await;

        Mock::given(method("GET"))
            .and(path("/sync/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasetGenerationKey": "gen-1",
                "snapshotBlob": null,
                "serverSeq": 0,
                "ops": [],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        engine.initialize().await.unwrap();
        repository.create_list("l1", "Groceries", None, None).await.unwrap();

        Mock::given(method("POST"))
            .and(path("/sync/push"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"serverSeq": 9, "datasetGenerationKey": "gen-2"})))
            .mount(&server)
            .await;

        let registry_state = tasklist_crdt::registry::RegistryCrdt::new(tasklist_core::ActorId::from("seed")).encode_snapshot().unwrap();
        let dataset = DatasetSnapshot { registry_state, lists: std::collections::HashMap::new() };
        Mock::given(method("GET"))
            .and(path("/sync/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasetGenerationKey": "gen-2",
                "snapshotBlob": dataset.encode().unwrap(),
                "serverSeq": 9,
                "ops": [],
            })))
            .mount(&server)
            .await;

        engine.sync_once().await.unwrap();

        // The reset wiped the local dataset (bootstrap from gen-2 had no lists).
        assert!(repository.get_list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dataset_generation_reset_emits_a_registry_event_exactly_once() {
        let server = MockServer::start().await;
        let (repository, engine) = engine_with(&server).await;

        Mock::given(method("GET"))
            .and(path("/sync/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasetGenerationKey": "gen-1",
                "snapshotBlob": null,
                "serverSeq": 0,
                "ops": [],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        engine.initialize().await.unwrap();
        repository.create_list("l1", "Groceries", None, None).await.unwrap();

        Mock::given(method("POST"))
            .and(path("/sync/push"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"serverSeq": 9, "datasetGenerationKey": "gen-2"})))
            .mount(&server)
            .await;

        let registry_state = tasklist_crdt::registry::RegistryCrdt::new(tasklist_core::ActorId::from("seed")).encode_snapshot().unwrap();
        let dataset = DatasetSnapshot { registry_state, lists: std::collections::HashMap::new() };
        Mock::given(method("GET"))
            .and(path("/sync/bootstrap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasetGenerationKey": "gen-2",
                "snapshotBlob": dataset.encode().unwrap(),
                "serverSeq": 9,
                "ops": [],
            })))
            .mount(&server)
            .await;

        let mut events = repository.subscribe();
        engine.sync_once().await.unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, Event::Registry(_)));
        // No second event follows the reset.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), events.recv()).await.is_err(),
            "expected exactly one registry event for the dataset-generation reset"
        );
    }
}
