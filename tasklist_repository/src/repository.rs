use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use smallvec::{SmallVec, smallvec};
use snafu::{OptionExt, ResultExt};
use tokio::sync::{Mutex, broadcast};

use tasklist_core::ActorId;
use tasklist_crdt::ordered_set::Op as CrdtOp;
use tasklist_crdt::registry::{RegistryCrdt, RegistryEntrySnapshot, RegistryPayload};
use tasklist_crdt::tasklist::{ListState, TaskListCrdt, TaskListOp, TaskPartial, TaskSnapshot};
use tasklist_storage::{StorageAdapter, WriteGroup};
use tasklist_wire::envelope::{decode_payload, encode_payload};
use tasklist_wire::export::{self, ExportData, ExportedList, ParseOutcome};
use tasklist_wire::scope::REGISTRY_RESOURCE_ID;
use tasklist_wire::{Scope as WireScope, SyncEnvelope};

use crate::errors::{
    CodecSnafu, CrdtSnafu, ImportFailedSnafu, NotInitializedSnafu, Result, StorageSnafu, UnknownListSnafu, UnknownTaskSnafu, WireSnafu,
};
use crate::events::Event;
use crate::history::History;
use crate::hydrator;
use crate::mutation::Mutation;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct State {
    registry: RegistryCrdt,
    lists: HashMap<String, TaskListCrdt>,
    history: History,
}

/// Owns every CRDT instance and mediates every mutation (§4.7). Single
/// logical owner of state: the `tokio::Mutex` stands in for the
/// single-threaded cooperative execution model of §5 — at most one mutation
/// or read is ever touching the CRDTs at a time, and it holds the lock
/// across its storage awaits rather than releasing it mid-mutation.
pub struct Repository<S: StorageAdapter> {
    storage: Arc<S>,
    actor: ActorId,
    state: Mutex<Option<State>>,
    events: broadcast::Sender<Event>,
}

impl<S: StorageAdapter> Repository<S> {
    pub fn new(storage: Arc<S>, actor: ActorId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { storage, actor, state: Mutex::new(None), events }
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Rebuilds every CRDT from storage. Emits no events — the first
    /// emission happens only after this returns, from a subsequent
    /// mutation or `apply_remote_ops`.
    pub async fn initialize(&self) -> Result<()> {
        let (registry, lists) = hydrator::hydrate(self.storage.as_ref(), self.actor.clone()).await?;
        *self.state.lock().await = Some(State { registry, lists, history: History::default() });
        Ok(())
    }

    /// Drops the CRDT instances. Existing `broadcast::Receiver`s simply stop
    /// receiving anything new (subscribers are weak-by-convention, per
    /// §9's ownership notes); in-flight storage writes are left to finish.
    pub async fn dispose(&self) {
        *self.state.lock().await = None;
    }

    // ---- subscriptions --------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn subscribe_registry(&self, emit_current: bool) -> Result<(broadcast::Receiver<Event>, Option<Event>)> {
        let rx = self.events.subscribe();
        if !emit_current {
            return Ok((rx, None));
        }
        Ok((rx, Some(Event::Registry(self.get_registry_snapshot().await?))))
    }

    pub async fn subscribe_list(&self, list_id: &str, emit_current: bool) -> Result<(broadcast::Receiver<Event>, Option<Event>)> {
        let rx = self.events.subscribe();
        if !emit_current {
            return Ok((rx, None));
        }
        let state = self.get_list_state(list_id).await?;
        Ok((rx, Some(Event::List { list_id: list_id.to_string(), state })))
    }

    fn publish(&self, event: Event) {
        let _ = self.events.send(event);
    }

    // ---- reads ------------------------------------------------------------

    pub async fn get_registry_snapshot(&self) -> Result<Vec<RegistryEntrySnapshot>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().context(NotInitializedSnafu)?;
        Ok(state.registry.snapshot())
    }

    pub async fn get_list_ids(&self) -> Result<Vec<String>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().context(NotInitializedSnafu)?;
        Ok(state.lists.keys().cloned().collect())
    }

    pub async fn get_list_state(&self, list_id: &str) -> Result<ListState> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().context(NotInitializedSnafu)?;
        state.lists.get(list_id).map(TaskListCrdt::state).context(UnknownListSnafu { list_id: list_id.to_string() })
    }

    pub async fn get_list_snapshot(&self, list_id: &str) -> Result<Vec<TaskSnapshot>> {
        Ok(self.get_list_state(list_id).await?.tasks)
    }

    pub async fn get_task_snapshot(&self, list_id: &str, item_id: &str) -> Result<TaskSnapshot> {
        let state = self.get_list_state(list_id).await?;
        state
            .tasks
            .into_iter()
            .find(|task| task.id == item_id)
            .context(UnknownTaskSnafu { list_id: list_id.to_string(), item_id: item_id.to_string() })
    }

    // ---- mutations ----------------------------------------------------

    pub async fn create_list(&self, list_id: impl Into<String>, title: impl Into<String>, after_id: Option<&str>, before_id: Option<&str>) -> Result<Vec<RegistryEntrySnapshot>> {
        let mutation = Mutation::CreateList {
            list_id: list_id.into(),
            title: title.into(),
            after_id: after_id.map(String::from),
            before_id: before_id.map(String::from),
        };
        self.mutate(mutation).await?.into_iter().find_map(registry_events).context(NotInitializedSnafu)
    }

    pub async fn remove_list(&self, list_id: &str) -> Result<Vec<RegistryEntrySnapshot>> {
        self.mutate(Mutation::RemoveList { list_id: list_id.to_string() })
            .await?
            .into_iter()
            .find_map(registry_events)
            .context(NotInitializedSnafu)
    }

    pub async fn rename_list(&self, list_id: &str, title: impl Into<String>) -> Result<ListState> {
        self.mutate(Mutation::RenameList { list_id: list_id.to_string(), title: title.into() })
            .await?
            .into_iter()
            .find_map(|e| list_event(e, list_id))
            .context(NotInitializedSnafu)
    }

    pub async fn reorder_list(&self, list_id: &str, after_id: Option<&str>, before_id: Option<&str>) -> Result<Vec<RegistryEntrySnapshot>> {
        self.mutate(Mutation::ReorderList { list_id: list_id.to_string(), after_id: after_id.map(String::from), before_id: before_id.map(String::from) })
            .await?
            .into_iter()
            .find_map(registry_events)
            .context(NotInitializedSnafu)
    }

    pub async fn insert_task(&self, list_id: &str, item_id: impl Into<String>, text: impl Into<String>, after_id: Option<&str>, before_id: Option<&str>) -> Result<ListState> {
        self.mutate(Mutation::InsertTask {
            list_id: list_id.to_string(),
            item_id: item_id.into(),
            text: text.into(),
            after_id: after_id.map(String::from),
            before_id: before_id.map(String::from),
        })
        .await?
        .into_iter()
        .find_map(|e| list_event(e, list_id))
        .context(NotInitializedSnafu)
    }

    pub async fn update_task(&self, list_id: &str, item_id: &str, text: Option<String>, note: Option<Option<String>>) -> Result<ListState> {
        self.mutate(Mutation::UpdateTask { list_id: list_id.to_string(), item_id: item_id.to_string(), text, note })
            .await?
            .into_iter()
            .find_map(|e| list_event(e, list_id))
            .context(NotInitializedSnafu)
    }

    pub async fn toggle_task(&self, list_id: &str, item_id: &str) -> Result<ListState> {
        self.mutate(Mutation::ToggleTask { list_id: list_id.to_string(), item_id: item_id.to_string() })
            .await?
            .into_iter()
            .find_map(|e| list_event(e, list_id))
            .context(NotInitializedSnafu)
    }

    pub async fn remove_task(&self, list_id: &str, item_id: &str) -> Result<ListState> {
        self.mutate(Mutation::RemoveTask { list_id: list_id.to_string(), item_id: item_id.to_string() })
            .await?
            .into_iter()
            .find_map(|e| list_event(e, list_id))
            .context(NotInitializedSnafu)
    }

    pub async fn move_task_within_list(&self, list_id: &str, item_id: &str, after_id: Option<&str>, before_id: Option<&str>) -> Result<ListState> {
        self.mutate(Mutation::MoveTaskWithinList {
            list_id: list_id.to_string(),
            item_id: item_id.to_string(),
            after_id: after_id.map(String::from),
            before_id: before_id.map(String::from),
        })
        .await?
        .into_iter()
        .find_map(|e| list_event(e, list_id))
        .context(NotInitializedSnafu)
    }

    /// Cross-list move: both target lists must exist and the task must
    /// exist in `from_list`, checked before any op is generated, so a
    /// missing id never leaves one list written and the other not (§4.7).
    pub async fn move_task(&self, from_list: &str, to_list: &str, item_id: &str, after_id: Option<&str>, before_id: Option<&str>) -> Result<(ListState, ListState)> {
        let events = self.mutate(Mutation::MoveTask {
            from_list: from_list.to_string(),
            to_list: to_list.to_string(),
            item_id: item_id.to_string(),
            after_id: after_id.map(String::from),
            before_id: before_id.map(String::from),
        })
        .await?;
        let from_state = events.iter().find_map(|e| list_event(e.clone(), from_list)).context(NotInitializedSnafu)?;
        let to_state = events.into_iter().find_map(|e| list_event(e, to_list)).context(NotInitializedSnafu)?;
        Ok((from_state, to_state))
    }

    pub async fn merge_task(&self, list_id: &str, survivor_id: &str, absorbed_id: &str) -> Result<ListState> {
        self.mutate(Mutation::MergeTask { list_id: list_id.to_string(), survivor_id: survivor_id.to_string(), absorbed_id: absorbed_id.to_string() })
            .await?
            .into_iter()
            .find_map(|e| list_event(e, list_id))
            .context(NotInitializedSnafu)
    }

    pub async fn undo(&self) -> Result<bool> {
        self.replay_history(History::undo).await
    }

    pub async fn redo(&self) -> Result<bool> {
        self.replay_history(History::redo).await
    }

    async fn replay_history(&self, pop: fn(&mut History) -> Option<crate::history::UndoEntry>) -> Result<bool> {
        let now = Utc::now();
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().context(NotInitializedSnafu)?;
        let Some(entry) = pop(&mut state.history) else {
            return Ok(false);
        };
        let (_, events, envelopes) = self.dispatch(state, entry.inverse, now).await?;
        self.enqueue_envelopes(state, envelopes).await?;
        drop(guard);
        for event in events {
            self.publish(event);
        }
        Ok(true)
    }

    pub async fn apply_remote_ops(&self, envelopes: Vec<SyncEnvelope>) -> Result<()> {
        let now = Utc::now();
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().context(NotInitializedSnafu)?;

        let mut touched_registry = false;
        let mut touched_lists: HashSet<String> = HashSet::new();

        for envelope in envelopes {
            match envelope.scope {
                WireScope::Registry => match decode_payload::<CrdtOp<RegistryPayload>>(&envelope.payload) {
                    Ok(op) => {
                        if state.registry.apply(op, now) {
                            touched_registry = true;
                        }
                    }
                    Err(err) => log::warn!("dropping malformed registry op: {err}"),
                },
                WireScope::List => match decode_payload::<TaskListOp>(&envelope.payload) {
                    Ok(op) => {
                        let list_id = envelope.resource_id.clone();
                        let list = state.lists.entry(list_id.clone()).or_insert_with(|| TaskListCrdt::new(self.actor.clone(), String::new()));
                        if list.apply(op, now) {
                            touched_lists.insert(list_id);
                        }
                    }
                    Err(err) => log::warn!("dropping malformed list op: {err}"),
                },
            }
        }

        if touched_registry {
            self.persist_registry_snapshot(state).await?;
        }
        for list_id in &touched_lists {
            self.persist_list_snapshot(state, list_id).await?;
        }

        let mut events = Vec::new();
        if touched_registry {
            events.push(Event::Registry(state.registry.snapshot()));
        }
        for list_id in &touched_lists {
            events.push(Event::List { list_id: list_id.clone(), state: state.lists[list_id].state() });
        }
        drop(guard);
        for event in events {
            self.publish(event);
        }
        Ok(())
    }

    // ---- export / dataset-generation reset -----------------------------

    pub async fn build_export_snapshot(&self) -> Result<String> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().context(NotInitializedSnafu)?;
        let data = ExportData {
            registry: state.registry.snapshot(),
            lists: state.lists.iter().map(|(list_id, list)| ExportedList { list_id: list_id.clone(), state: list.state() }).collect(),
            exported_at: Utc::now(),
        };
        export::build(&data).context(WireSnafu)
    }

    /// Raw CRDT-level snapshot of every list plus the registry, suitable as
    /// the payload for [`Self::replace_with_snapshot`] on another device or
    /// as the body of a dataset-generation reset push — unlike
    /// [`Self::build_export_snapshot`], which decodes entries into the
    /// human-portable §6 export format.
    pub async fn build_dataset_snapshot(&self) -> Result<(String, HashMap<String, String>)> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().context(NotInitializedSnafu)?;
        let registry_state = state.registry.encode_snapshot().context(CodecSnafu)?;
        let mut lists = HashMap::new();
        for (list_id, list) in &state.lists {
            lists.insert(list_id.clone(), list.encode_snapshot().context(CodecSnafu)?);
        }
        Ok((registry_state, lists))
    }

    pub fn parse_export_snapshot(json: &str) -> Result<ExportData> {
        match export::parse(json) {
            ParseOutcome::Ok { value } => Ok(value),
            ParseOutcome::Err { error } => ImportFailedSnafu { reason: error }.fail(),
        }
    }

    /// Full-fidelity state replace from the CRDT-level snapshot blobs used
    /// by the sync engine's dataset-generation reset (§4.9 step 4) — not
    /// the human-portable export produced by `build_export_snapshot`. Always
    /// fires a `registry` event afterwards, once, since any caller of this
    /// method has just replaced the registry out from under whatever state
    /// subscribers had (§7, E5).
    pub async fn replace_with_snapshot(&self, registry_state: &str, lists: HashMap<String, String>) -> Result<()> {
        self.storage.clear().await.context(StorageSnafu)?;

        let mut registry = RegistryCrdt::new(self.actor.clone());
        registry.reset_from_snapshot(registry_state).context(CodecSnafu)?;
        self.storage.persist_registry(WriteGroup { ops: vec![], snapshot: Some(registry_state.to_string()) }).await.context(StorageSnafu)?;

        let mut new_lists = HashMap::new();
        for (list_id, snapshot) in lists {
            let mut list = TaskListCrdt::new(self.actor.clone(), String::new());
            list.reset_from_snapshot(&snapshot).context(CodecSnafu)?;
            self.storage.persist_operations(&list_id, WriteGroup { ops: vec![], snapshot: Some(snapshot) }).await.context(StorageSnafu)?;
            new_lists.insert(list_id, list);
        }

        let registry_snapshot = registry.snapshot();
        let mut guard = self.state.lock().await;
        *guard = Some(State { registry, lists: new_lists, history: History::default() });
        self.storage.persist_outbox(Vec::new()).await.context(StorageSnafu)?;
        drop(guard);

        self.publish(Event::Registry(registry_snapshot));
        Ok(())
    }

    // ---- internals --------------------------------------------------------

    async fn mutate(&self, mutation: Mutation) -> Result<Vec<Event>> {
        let now = Utc::now();
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().context(NotInitializedSnafu)?;
        let (inverse, events, envelopes) = self.dispatch(state, mutation.clone(), now).await?;
        self.enqueue_envelopes(state, envelopes).await?;
        state.history.record(mutation, inverse, now);
        drop(guard);
        for event in events.clone() {
            self.publish(event);
        }
        Ok(events.into_vec())
    }

    /// Appends to the outbox as a read-modify-write against storage rather
    /// than an in-memory cache: the sync engine drains the same store
    /// independently (§5), so the repository never assumes it owns the only
    /// copy.
    async fn enqueue_envelopes(&self, _state: &mut State, envelopes: SmallVec<[SyncEnvelope; 2]>) -> Result<()> {
        if envelopes.is_empty() {
            return Ok(());
        }
        let mut outbox = self.storage.load_outbox().await.context(StorageSnafu)?;
        outbox.extend(envelopes);
        self.storage.persist_outbox(outbox).await.context(StorageSnafu)
    }

    async fn persist_registry_snapshot(&self, state: &State) -> Result<()> {
        let json = state.registry.encode_snapshot().context(CodecSnafu)?;
        self.storage.persist_registry(WriteGroup { ops: vec![], snapshot: Some(json) }).await.context(StorageSnafu)
    }

    async fn persist_list_snapshot(&self, state: &State, list_id: &str) -> Result<()> {
        let list = state.lists.get(list_id).context(UnknownListSnafu { list_id: list_id.to_string() })?;
        let json = list.encode_snapshot().context(CodecSnafu)?;
        self.storage.persist_operations(list_id, WriteGroup { ops: vec![], snapshot: Some(json) }).await.context(StorageSnafu)
    }

    fn registry_envelope(&self, op: &CrdtOp<RegistryPayload>) -> Result<SyncEnvelope> {
        Ok(SyncEnvelope {
            scope: WireScope::Registry,
            resource_id: REGISTRY_RESOURCE_ID.to_string(),
            actor: op.actor().clone(),
            clock: op.clock(),
            payload: encode_payload(op).context(WireSnafu)?,
            server_seq: None,
        })
    }

    fn list_envelope(&self, list_id: &str, op: &TaskListOp) -> Result<SyncEnvelope> {
        let (actor, clock) = match op {
            TaskListOp::Task(op) => (op.actor().clone(), op.clock()),
            TaskListOp::Rename(rename) => (rename.actor.clone(), rename.clock),
        };
        Ok(SyncEnvelope {
            scope: WireScope::List,
            resource_id: list_id.to_string(),
            actor,
            clock,
            payload: encode_payload(op).context(WireSnafu)?,
            server_seq: None,
        })
    }

    fn list_mut<'a>(state: &'a mut State, list_id: &str) -> Result<&'a mut TaskListCrdt> {
        state.lists.get_mut(list_id).context(UnknownListSnafu { list_id: list_id.to_string() })
    }

    /// Applies one mutation's CRDT writes, persists every affected
    /// snapshot, and returns `(computed inverse, change events, sync
    /// envelopes)`. The only place that knows how to turn a `Mutation` into
    /// CRDT operations — both fresh calls and undo/redo replay go through
    /// here.
    async fn dispatch(&self, state: &mut State, mutation: Mutation, now: DateTime<Utc>) -> Result<(Mutation, SmallVec<[Event; 2]>, SmallVec<[SyncEnvelope; 2]>)> {
        match mutation {
            Mutation::CreateList { list_id, title, after_id, before_id } => {
                let (op, snapshot) = state.registry.generate_insert(list_id.clone(), title.clone(), after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                state.lists.insert(list_id.clone(), TaskListCrdt::new(self.actor.clone(), title));
                self.persist_registry_snapshot(state).await?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.registry_envelope(&op)?;
                Ok((Mutation::RemoveList { list_id }, smallvec![Event::Registry(snapshot)], smallvec![envelope]))
            }

            Mutation::RemoveList { list_id } => {
                let (after_id, before_id) = state.registry.inner().live_neighbours(&list_id);
                let (op, snapshot) = state.registry.generate_remove(&list_id, now).context(CrdtSnafu)?;
                self.persist_registry_snapshot(state).await?;
                let envelope = self.registry_envelope(&op)?;
                Ok((Mutation::RestoreList { list_id, after_id, before_id }, smallvec![Event::Registry(snapshot)], smallvec![envelope]))
            }

            Mutation::RestoreList { list_id, after_id, before_id } => {
                let (op, snapshot) = state.registry.generate_restore(list_id.clone(), after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_registry_snapshot(state).await?;
                let envelope = self.registry_envelope(&op)?;
                Ok((Mutation::RemoveList { list_id }, smallvec![Event::Registry(snapshot)], smallvec![envelope]))
            }

            Mutation::RenameList { list_id, title } => {
                let list = Self::list_mut(state, &list_id)?;
                let prior_title = list.title().get().to_string();
                let (op, list_state) = list.generate_rename(title.clone());
                self.persist_list_snapshot(state, &list_id).await?;
                let mut envelopes = smallvec![self.list_envelope(&list_id, &op)?];
                if let Ok((registry_op, _)) = state.registry.generate_rename(&list_id, title, now) {
                    self.persist_registry_snapshot(state).await?;
                    envelopes.push(self.registry_envelope(&registry_op)?);
                }
                Ok((Mutation::RenameList { list_id: list_id.clone(), title: prior_title }, smallvec![Event::List { list_id, state: list_state }], envelopes))
            }

            Mutation::ReorderList { list_id, after_id, before_id } => {
                let (prior_after, prior_before) = state.registry.inner().live_neighbours(&list_id);
                let (op, snapshot) = state.registry.generate_move(&list_id, after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_registry_snapshot(state).await?;
                let envelope = self.registry_envelope(&op)?;
                Ok((
                    Mutation::ReorderList { list_id, after_id: prior_after, before_id: prior_before },
                    smallvec![Event::Registry(snapshot)],
                    smallvec![envelope],
                ))
            }

            Mutation::InsertTask { list_id, item_id, text, after_id, before_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let (op, list_state) = list.generate_insert(item_id.clone(), text, after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.list_envelope(&list_id, &op)?;
                Ok((Mutation::RemoveTask { list_id: list_id.clone(), item_id }, smallvec![Event::List { list_id, state: list_state }], smallvec![envelope]))
            }

            Mutation::UpdateTask { list_id, item_id, text, note } => {
                let list = Self::list_mut(state, &list_id)?;
                let prior = list.inner().get(&item_id).context(UnknownTaskSnafu { list_id: list_id.clone(), item_id: item_id.clone() })?;
                let prior_text = text.is_some().then(|| prior.data().text.get().clone());
                let prior_note = note.is_some().then(|| prior.data().note.get().clone());
                let (op, list_state) = list.generate_update(&item_id, text, note, now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.list_envelope(&list_id, &op)?;
                Ok((
                    Mutation::UpdateTask { list_id: list_id.clone(), item_id, text: prior_text, note: prior_note },
                    smallvec![Event::List { list_id, state: list_state }],
                    smallvec![envelope],
                ))
            }

            Mutation::ToggleTask { list_id, item_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let (op, list_state) = list.generate_toggle(&item_id, now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.list_envelope(&list_id, &op)?;
                Ok((Mutation::ToggleTask { list_id: list_id.clone(), item_id }, smallvec![Event::List { list_id, state: list_state }], smallvec![envelope]))
            }

            Mutation::RemoveTask { list_id, item_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let (after_id, before_id) = list.inner().live_neighbours(&item_id);
                let (op, list_state) = list.generate_remove(&item_id, now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.list_envelope(&list_id, &op)?;
                Ok((
                    Mutation::RestoreTask { list_id: list_id.clone(), item_id, after_id, before_id },
                    smallvec![Event::List { list_id, state: list_state }],
                    smallvec![envelope],
                ))
            }

            Mutation::RestoreTask { list_id, item_id, after_id, before_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let (op, list_state) = list.generate_restore(item_id.clone(), after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.list_envelope(&list_id, &op)?;
                Ok((Mutation::RemoveTask { list_id: list_id.clone(), item_id }, smallvec![Event::List { list_id, state: list_state }], smallvec![envelope]))
            }

            Mutation::MoveTaskWithinList { list_id, item_id, after_id, before_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let (prior_after, prior_before) = list.inner().live_neighbours(&item_id);
                let (op, list_state) = list.generate_move(&item_id, after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;
                let envelope = self.list_envelope(&list_id, &op)?;
                Ok((
                    Mutation::MoveTaskWithinList { list_id: list_id.clone(), item_id, after_id: prior_after, before_id: prior_before },
                    smallvec![Event::List { list_id, state: list_state }],
                    smallvec![envelope],
                ))
            }

            Mutation::MoveTask { from_list, to_list, item_id, after_id, before_id } => {
                snafu::ensure!(state.lists.contains_key(&from_list), UnknownListSnafu { list_id: from_list.clone() });
                snafu::ensure!(state.lists.contains_key(&to_list), UnknownListSnafu { list_id: to_list.clone() });
                let source = state.lists.get(&from_list).unwrap();
                let task = source.inner().get(&item_id).context(UnknownTaskSnafu { list_id: from_list.clone(), item_id: item_id.clone() })?;
                let partial = TaskPartial { text: Some(task.data().text.get().clone()), done: Some(*task.data().done.get()), note: Some(task.data().note.get().clone()) };
                let (restore_after, restore_before) = source.inner().live_neighbours(&item_id);

                let from = Self::list_mut(state, &from_list)?;
                let (remove_op, from_state) = from.generate_remove(&item_id, now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &from_list).await?;

                let to = Self::list_mut(state, &to_list)?;
                let (insert_op, to_state) = to.generate_insert_full(item_id.clone(), partial, after_id.as_deref(), before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &to_list).await?;

                let envelopes = smallvec![self.list_envelope(&from_list, &remove_op)?, self.list_envelope(&to_list, &insert_op)?];
                let events = smallvec![Event::List { list_id: from_list.clone(), state: from_state }, Event::List { list_id: to_list.clone(), state: to_state }];
                Ok((
                    Mutation::MoveTask { from_list: to_list, to_list: from_list, item_id, after_id: restore_after, before_id: restore_before },
                    events,
                    envelopes,
                ))
            }

            Mutation::MergeTask { list_id, survivor_id, absorbed_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let survivor = list.inner().get(&survivor_id).context(UnknownTaskSnafu { list_id: list_id.clone(), item_id: survivor_id.clone() })?;
                let survivor_prior_text = survivor.data().text.get().clone();
                let absorbed = list.inner().get(&absorbed_id).context(UnknownTaskSnafu { list_id: list_id.clone(), item_id: absorbed_id.clone() })?;
                let absorbed_text = absorbed.data().text.get().clone();
                let (absorbed_after_id, absorbed_before_id) = list.inner().live_neighbours(&absorbed_id);

                let merged_text = format!("{survivor_prior_text}{absorbed_text}");
                let (update_op, _) = list.generate_update(&survivor_id, Some(merged_text), None, now).context(CrdtSnafu)?;
                let (remove_op, list_state) = list.generate_remove(&absorbed_id, now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;

                let envelopes = smallvec![self.list_envelope(&list_id, &update_op)?, self.list_envelope(&list_id, &remove_op)?];
                Ok((
                    Mutation::UnmergeTask { list_id: list_id.clone(), survivor_id, survivor_prior_text, absorbed_id, absorbed_after_id, absorbed_before_id },
                    smallvec![Event::List { list_id, state: list_state }],
                    envelopes,
                ))
            }

            Mutation::UnmergeTask { list_id, survivor_id, survivor_prior_text, absorbed_id, absorbed_after_id, absorbed_before_id } => {
                let list = Self::list_mut(state, &list_id)?;
                let (update_op, _) = list.generate_update(&survivor_id, Some(survivor_prior_text), None, now).context(CrdtSnafu)?;
                let (restore_op, list_state) = list.generate_restore(absorbed_id.clone(), absorbed_after_id.as_deref(), absorbed_before_id.as_deref(), now).context(CrdtSnafu)?;
                self.persist_list_snapshot(state, &list_id).await?;

                let envelopes = smallvec![self.list_envelope(&list_id, &update_op)?, self.list_envelope(&list_id, &restore_op)?];
                Ok((
                    Mutation::MergeTask { list_id: list_id.clone(), survivor_id, absorbed_id },
                    smallvec![Event::List { list_id, state: list_state }],
                    envelopes,
                ))
            }
        }
    }
}

fn registry_events(event: Event) -> Option<Vec<RegistryEntrySnapshot>> {
    match event {
        Event::Registry(snapshot) => Some(snapshot),
        Event::List { .. } => None,
    }
}

fn list_event(event: Event, list_id: &str) -> Option<ListState> {
    match event {
        Event::List { list_id: id, state } if id == list_id => Some(state),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklist_storage::MemoryStorage;

    async fn repo(actor: &str) -> Repository<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::default());
        let repository = Repository::new(storage, ActorId::from(actor));
        repository.initialize().await.unwrap();
        repository
    }

    #[tokio::test]
    async fn create_list_and_insert_task_round_trips_through_reads() {
        let repo = repo("a").await;
        repo.create_list("l1", "Groceries", None, None).await.unwrap();
        repo.insert_task("l1", "t1", "milk", None, None).await.unwrap();

        let state = repo.get_list_state("l1").await.unwrap();
        assert_eq!(state.title, "Groceries");
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].text, "milk");
        assert!(!state.tasks[0].done);
    }

    #[tokio::test]
    async fn undo_restores_a_removed_task_at_its_prior_position() {
        let repo = repo("a").await;
        repo.create_list("l1", "Groceries", None, None).await.unwrap();
        repo.insert_task("l1", "t1", "milk", None, None).await.unwrap();
        repo.insert_task("l1", "t2", "eggs", Some("t1"), None).await.unwrap();

        repo.remove_task("l1", "t1").await.unwrap();
        let after_remove = repo.get_list_snapshot("l1").await.unwrap();
        assert_eq!(after_remove.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["t2"]);

        assert!(repo.undo().await.unwrap());
        let restored = repo.get_list_snapshot("l1").await.unwrap();
        assert_eq!(restored.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["t1", "t2"]);
        assert_eq!(restored[0].text, "milk");
    }

    #[tokio::test]
    async fn redo_reapplies_an_undone_toggle() {
        let repo = repo("a").await;
        repo.create_list("l1", "Groceries", None, None).await.unwrap();
        repo.insert_task("l1", "t1", "milk", None, None).await.unwrap();
        repo.toggle_task("l1", "t1").await.unwrap();
        assert!(repo.get_task_snapshot("l1", "t1").await.unwrap().done);

        assert!(repo.undo().await.unwrap());
        assert!(!repo.get_task_snapshot("l1", "t1").await.unwrap().done);

        assert!(repo.redo().await.unwrap());
        assert!(repo.get_task_snapshot("l1", "t1").await.unwrap().done);
    }

    #[tokio::test]
    async fn move_task_across_lists_preserves_payload_and_undo_moves_it_back() {
        let repo = repo("a").await;
        repo.create_list("l1", "Errands", None, None).await.unwrap();
        repo.create_list("l2", "Groceries", None, None).await.unwrap();
        repo.insert_task("l1", "t1", "buy stamps", None, None).await.unwrap();
        repo.toggle_task("l1", "t1").await.unwrap();

        repo.move_task("l1", "l2", "t1", None, None).await.unwrap();
        assert!(repo.get_list_snapshot("l1").await.unwrap().is_empty());
        let moved = repo.get_task_snapshot("l2", "t1").await.unwrap();
        assert_eq!(moved.text, "buy stamps");
        assert!(moved.done);

        assert!(repo.undo().await.unwrap());
        assert!(repo.get_list_snapshot("l2").await.unwrap().is_empty());
        let back = repo.get_task_snapshot("l1", "t1").await.unwrap();
        assert_eq!(back.text, "buy stamps");
        assert!(back.done);
    }

    #[tokio::test]
    async fn merge_task_concatenates_text_and_unmerge_restores_both() {
        let repo = repo("a").await;
        repo.create_list("l1", "Notes", None, None).await.unwrap();
        repo.insert_task("l1", "t1", "Buy ", None, None).await.unwrap();
        repo.insert_task("l1", "t2", "milk", Some("t1"), None).await.unwrap();

        repo.merge_task("l1", "t1", "t2").await.unwrap();
        let merged = repo.get_list_snapshot("l1").await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Buy milk");

        assert!(repo.undo().await.unwrap());
        let unmerged = repo.get_list_snapshot("l1").await.unwrap();
        assert_eq!(unmerged.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(), vec!["Buy ", "milk"]);
    }

    #[tokio::test]
    async fn remove_wins_over_a_lower_clock_late_update_on_convergence() {
        // Mirrors the "remove then late update" scenario: two independent
        // replicas start from the same state, one removes an entry while
        // the other (unaware) updates it with fewer prior operations of its
        // own — so its clock for that op is lower. After each side absorbs
        // the other's op, the tombstone wins regardless of arrival order.
        let repo_a = repo("aaa").await;
        repo_a.create_list("l1", "Shopping", None, None).await.unwrap();
        repo_a.insert_task("l1", "t1", "milk", None, None).await.unwrap();

        let (registry_state, lists) = repo_a.build_dataset_snapshot().await.unwrap();
        let repo_b = repo("bbb").await;
        repo_b.replace_with_snapshot(&registry_state, lists).await.unwrap();

        // A performs an extra op first, so its clock runs ahead before it removes.
        repo_a.toggle_task("l1", "t1").await.unwrap();
        let remove_events = repo_a.remove_task("l1", "t1").await.unwrap();
        assert!(remove_events.tasks.is_empty());

        let update_events = repo_b.update_task("l1", "t1", Some("late".to_string()), None).await.unwrap();
        assert_eq!(update_events.tasks[0].text, "late");

        // Exchange the two ops captured from each side's outbox.
        let a_ops = drain_outbox(&repo_a).await;
        let b_ops = drain_outbox(&repo_b).await;

        repo_b.apply_remote_ops(a_ops).await.unwrap();
        repo_a.apply_remote_ops(b_ops).await.unwrap();

        assert!(repo_a.get_list_snapshot("l1").await.unwrap().is_empty());
        assert!(repo_b.get_list_snapshot("l1").await.unwrap().is_empty());
    }

    async fn drain_outbox(repo: &Repository<MemoryStorage>) -> Vec<SyncEnvelope> {
        repo.storage.load_outbox().await.unwrap()
    }
}
