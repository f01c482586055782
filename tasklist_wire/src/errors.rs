use snafu::Snafu;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WireError {
    #[snafu(display("could not {action} wire JSON: {source}"))]
    Json { action: String, source: serde_json::Error },

    #[snafu(display("unsupported envelope schema {schema:?} (expected {expected:?})"))]
    UnsupportedSchema { schema: String, expected: String },
}
