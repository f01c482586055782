use snafu::Snafu;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Per the error taxonomy: transport and storage faults are swallowed by
/// the engine itself and retried on the next tick (`sync_once` logs and
/// returns `Ok(())` for those). `SyncError` surfaces only what a caller
/// must react to synchronously — bad configuration, or a directly-invoked
/// `sync_once`/`reset` a caller chose to await and handle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("cannot construct a sync engine without a clientId"))]
    MissingClientId,

    #[snafu(display("request to {url} failed: {source}"))]
    Transport { url: String, source: reqwest::Error },

    #[snafu(display("server returned {status} for {url}"))]
    Status { url: String, status: reqwest::StatusCode },

    #[snafu(display("storage operation failed: {source}"))]
    Storage { source: tasklist_storage::StorageError },

    #[snafu(display("repository operation failed: {source}"))]
    Repository { source: tasklist_repository::RepositoryError },

    #[snafu(display("dataset snapshot blob could not be (de)serialised: {source}"))]
    Dataset { source: tasklist_wire::WireError },
}
