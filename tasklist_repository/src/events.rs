use tasklist_crdt::registry::RegistryEntrySnapshot;
use tasklist_crdt::tasklist::ListState;

/// Change notification broadcast to subscribers. Hydration never emits one;
/// the first emission happens after `initialize` returns.
#[derive(Clone, Debug)]
pub enum Event {
    Registry(Vec<RegistryEntrySnapshot>),
    List { list_id: String, state: ListState },
}
