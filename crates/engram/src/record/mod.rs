//! Record types and helpers
//!
//! Defines the core memory record structure shared by the store, scorer,
//! consolidator, and version history.

pub mod types;

pub use types::{Affect, MemoryRecord, RecordKind, RESERVED_TAGS};
