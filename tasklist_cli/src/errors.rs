use snafu::Snafu;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("could not open the local store at {path}: {source}"))]
    Storage { path: String, source: tasklist_storage::StorageError },

    #[snafu(display("repository operation failed: {source}"))]
    Repository { source: tasklist_repository::RepositoryError },

    #[snafu(display("sync engine operation failed: {source}"))]
    Sync { source: tasklist_sync::SyncError },

    #[snafu(display("could not read or write {path}: {source}"))]
    Io { path: String, source: std::io::Error },

    #[snafu(display("{message}"))]
    Output { message: String },
}
