use snafu::Snafu;
use tasklist_crdt::CrdtError;
use tasklist_storage::StorageError;

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RepositoryError {
    #[snafu(display("no list with id {list_id:?}"))]
    UnknownList { list_id: String },

    #[snafu(display("no task {item_id:?} in list {list_id:?}"))]
    UnknownTask { list_id: String, item_id: String },

    #[snafu(display("CRDT generator rejected the mutation: {source}"))]
    Crdt { source: CrdtError },

    #[snafu(display("repository has not been initialized"))]
    NotInitialized,

    #[snafu(display("hydration failed: {source}"))]
    Hydration { source: StorageError },

    #[snafu(display("storage write failed: {source}"))]
    Storage { source: StorageError },

    #[snafu(display("snapshot could not be (de)serialised: {source}"))]
    Codec { source: CrdtError },

    #[snafu(display("wire envelope could not be built: {source}"))]
    Wire { source: tasklist_wire::WireError },

    #[snafu(display("could not parse an export snapshot: {reason}"))]
    ImportFailed { reason: String },
}
