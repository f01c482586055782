use snafu::Snafu;
use tasklist_core::CoreError;

pub type Result<T> = std::result::Result<T, CrdtError>;

/// Failure modes a *local* generator can hit. Remote apply never returns
/// these — a malformed or stale remote operation is logged and dropped
/// (§7 "invariant violations in apply"), never surfaced as an error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CrdtError {
    #[snafu(display("operation is invalid: {reason}"))]
    InvalidOperation { reason: String },

    #[snafu(display("no entry with id {id:?}"))]
    NotFound { id: String },

    #[snafu(display("could not compute a position: {source}"))]
    PositionConflict { source: CoreError },

    #[snafu(display("could not {action} snapshot or operation JSON: {source}"))]
    Codec { action: String, source: serde_json::Error },

    #[snafu(display("unsupported envelope schema {schema:?} (expected {expected:?})"))]
    UnsupportedSchema { schema: String, expected: String },
}
