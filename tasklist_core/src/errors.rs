use snafu::Snafu;

pub type Result<T> = std::result::Result<T, CoreError>;

/// The crate-wide error taxonomy for the convergence core.
///
/// Variants here are the *input* and *invariant* failures a caller can hit
/// when driving the position algebra or the ordered-set CRDT directly; see
/// `tasklist_crdt::CrdtError` for the apply/generator failure modes layered
/// on top of these.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("left position {left:?} is not strictly less than right position {right:?}"))]
    InvalidOrdering { left: String, right: String },

    #[snafu(display("actor id must not be empty"))]
    MissingActor,
}
