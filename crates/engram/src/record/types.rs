//! Record types for the Engram engine
//!
//! Defines the core `MemoryRecord` structure plus the supporting enums and
//! affect vector used throughout the store, scorer, consolidator, and
//! version history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Tags that carry retention-floor semantics. A record bearing one of these
/// never decays below its per-tag floor.
pub const RESERVED_TAGS: [&str; 4] = ["milestone", "emotional_peak", "protected", "first_time"];

/// Caller-supplied affect vector attached to a record.
///
/// The engine treats this as opaque numeric input to scoring; how it was
/// computed (classifier, annotation, heuristic) is the caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affect {
    /// Pleasantness, in [-1.0, 1.0]
    pub valence: f32,
    /// Activation level, in [0.0, 1.0]
    pub arousal: f32,
    /// Sense of control, in [0.0, 1.0]
    pub dominance: f32,
}

impl Affect {
    /// A neutral affect vector (all zeros)
    pub fn neutral() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.0,
            dominance: 0.0,
        }
    }

    /// Validate that every component is inside its documented range
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.valence) {
            return Err(EngramError::Validation(format!(
                "affect.valence {} outside [-1, 1]",
                self.valence
            )));
        }
        if !(0.0..=1.0).contains(&self.arousal) {
            return Err(EngramError::Validation(format!(
                "affect.arousal {} outside [0, 1]",
                self.arousal
            )));
        }
        if !(0.0..=1.0).contains(&self.dominance) {
            return Err(EngramError::Validation(format!(
                "affect.dominance {} outside [0, 1]",
                self.dominance
            )));
        }
        Ok(())
    }
}

impl Default for Affect {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Classification of record kinds. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A conversational exchange or message
    Conversation,
    /// A rollup summary produced by the consolidator
    TemporalSummary,
    /// Current state of a tracked entity
    EntityState,
    /// A point-in-time affect sample
    AffectSample,
    /// A relationship edge between entities
    RelationshipEdge,
    /// Technical/work context (notes, task state)
    WorkContext,
    /// State derived from other records
    DerivedState,
}

impl RecordKind {
    /// Stable string form, used in index keys and change events
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Conversation => "conversation",
            RecordKind::TemporalSummary => "temporal_summary",
            RecordKind::EntityState => "entity_state",
            RecordKind::AffectSample => "affect_sample",
            RecordKind::RelationshipEdge => "relationship_edge",
            RecordKind::WorkContext => "work_context",
            RecordKind::DerivedState => "derived_state",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single memory record stored in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, assigned at creation, immutable
    pub id: String,
    /// What kind of record this is; never changes after creation
    pub kind: RecordKind,
    /// Serialized payload; mutable only via explicit update
    pub content: String,
    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// When this record was last read or reinforced
    pub last_accessed_at: DateTime<Utc>,
    /// How many times this record has been accessed
    pub access_count: u32,
    /// How many times this record has been explicitly reinforced
    pub reinforcement_count: u32,
    /// Caller-supplied affect vector
    pub affect: Affect,
    /// Caller-supplied significance prior, in [0.0, 1.0]
    pub importance: f32,
    /// Free-form tags; reserved tags trigger retention floors
    pub tags: Vec<String>,
    /// Entities (people, places, subjects) this record concerns
    pub entities: Vec<String>,
    /// Cached retention score. Always recomputable from the other fields
    /// plus a clock reading; never a source of truth.
    pub retention_score: f32,
    /// Strictly increases on every persisted mutation
    pub version: u64,
    /// Ordered ids of snapshots taken of this record
    pub version_chain: Vec<String>,
}

impl MemoryRecord {
    /// Create a new record with default counters and a fresh timestamp
    pub fn new(kind: RecordKind, id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            reinforcement_count: 0,
            affect: Affect::neutral(),
            importance: 0.5,
            tags: Vec::new(),
            entities: Vec::new(),
            retention_score: 1.0,
            version: 0,
            version_chain: Vec::new(),
        }
    }

    /// Mark this record as accessed, updating access count and timestamp
    pub fn mark_accessed(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Utc::now();
    }

    /// Set the cached retention score, clamped to [0.0, 1.0]
    pub fn set_retention_score(&mut self, score: f32) {
        self.retention_score = score.clamp(0.0, 1.0);
    }

    /// Whether any reserved (floor-bearing) tag is present
    pub fn has_reserved_tag(&self) -> bool {
        self.tags.iter().any(|t| RESERVED_TAGS.contains(&t.as_str()))
    }

    /// Validate caller-controlled fields. Called before any lock is taken.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngramError::Validation("record id must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(EngramError::Validation(format!(
                "importance {} outside [0, 1]",
                self.importance
            )));
        }
        self.affect.validate()
    }
}
