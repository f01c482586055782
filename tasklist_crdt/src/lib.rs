pub mod codec;
pub mod entry;
pub mod errors;
pub mod lww;
pub mod ordered_set;
pub mod payload;
pub mod registry;
pub mod tasklist;

pub use entry::Entry;
pub use errors::{CrdtError, Result};
pub use lww::Lww;
pub use ordered_set::{Op, OpKind, OrderedSet};
pub use payload::Payload;
