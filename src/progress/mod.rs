//! Cross-process progress reporting.
//!
//! The running download job is the only writer of the progress document; the
//! status command and the broadcaster only read it. Every write replaces the
//! whole document through a rename, so readers always see a complete snapshot.

pub mod status;
pub mod store;

pub use status::{OverallStatus, PresetStatus, StatusReport};
pub(crate) use store::write_atomic;
pub use store::{ProgressRecord, ProgressSnapshot, ProgressStatus, ProgressStore, ProgressWriter};
