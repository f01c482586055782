use snafu::Snafu;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("durable storage backend failure: {source}"))]
    Backend { source: sled::Error },

    #[snafu(display("stored record could not be (de)serialised: {source}"))]
    Codec { source: serde_json::Error },

    #[snafu(display("storage transaction aborted"))]
    Transaction,
}
