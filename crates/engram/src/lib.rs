//! Engram - Tiered memory consolidation engine
//!
//! This crate provides a typed record store with per-record locking, a
//! forgetting-curve retention scorer with a background decay sweep, a
//! four-tier time-bucket consolidator, and append-only version history
//! with diff, branch, merge, and garbage collection.

pub mod config;
pub mod consolidation;
pub mod engine;
pub mod error;
pub mod history;
pub mod record;
pub mod retention;
pub mod store;

pub use config::Config;
pub use engine::{Engine, IngestRequest};
pub use error::{EngramError, Result};
pub use record::{Affect, MemoryRecord, RecordKind};
