//! Versioned record history
//!
//! An append-only, per-record chain of full snapshots with content-addressed
//! version ids, field-level diffing, branching, merging, and bounded
//! retention. The history stores independent serialized snapshots; it never
//! holds live references into the store.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngramError, Result};
use crate::record::MemoryRecord;

/// Metadata for one saved version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    /// Content-addressed id of this version
    pub version_id: String,
    /// Id of the record this version belongs to
    pub record_id: String,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Why the snapshot was taken
    pub reason: String,
    /// Who or what took the snapshot
    pub author: String,
    /// The version this one chains from, `None` for the first
    pub parent_version_id: Option<String>,
}

#[derive(Debug, Clone)]
struct VersionEntry {
    meta: VersionMeta,
    snapshot: String,
}

#[derive(Debug, Default)]
struct VersionLog {
    entries: Vec<VersionEntry>,
    latest: Option<String>,
}

/// One changed field between two versions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Name of the tracked field
    pub field: String,
    /// Value in the older version
    pub old: serde_json::Value,
    /// Value in the newer version
    pub new: serde_json::Value,
}

/// How `merge` combines two records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Union tags/entities, take max importance, average affect; content
    /// comes from the more recently touched record
    Combine,
    /// Return whichever record was touched later
    Latest,
}

/// Append-only version history over record snapshots.
pub struct VersionedHistory {
    logs: DashMap<String, VersionLog>,
}

impl VersionedHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
        }
    }

    /// Snapshot a record, chaining to the current LATEST. Returns the new
    /// version id.
    pub fn save_version(
        &self,
        record: &MemoryRecord,
        reason: &str,
        author: &str,
    ) -> Result<String> {
        self.save_internal(record, reason, author, None)
    }

    /// Resolve a version to its snapshotted record. `None` resolves LATEST.
    pub fn get_version(&self, record_id: &str, version_id: Option<&str>) -> Option<MemoryRecord> {
        let log = self.logs.get(record_id)?;
        let target = match version_id {
            Some(v) => v.to_string(),
            None => log.latest.clone()?,
        };
        log.entries
            .iter()
            .find(|e| e.meta.version_id == target)
            .and_then(|e| serde_json::from_str(&e.snapshot).ok())
    }

    /// Version metadata for a record, sorted by timestamp ascending. Empty
    /// when the record has no history.
    pub fn history(&self, record_id: &str) -> Vec<VersionMeta> {
        let Some(log) = self.logs.get(record_id) else {
            return Vec::new();
        };
        let mut metas: Vec<VersionMeta> = log.entries.iter().map(|e| e.meta.clone()).collect();
        metas.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        metas
    }

    /// The current LATEST version id for a record
    pub fn latest(&self, record_id: &str) -> Option<String> {
        self.logs.get(record_id).and_then(|log| log.latest.clone())
    }

    /// Compare two versions over the tracked fields (content, importance,
    /// affect, tags, retention score), returning only the fields that
    /// changed. `None` when either version is missing.
    pub fn diff(&self, record_id: &str, v1: &str, v2: &str) -> Option<Vec<FieldChange>> {
        let old = self.get_version(record_id, Some(v1))?;
        let new = self.get_version(record_id, Some(v2))?;
        Some(tracked_field_changes(&old, &new))
    }

    /// Create a branch: re-tag the snapshot at `from_version` (LATEST when
    /// `None`) with the branch name and append it chained to that version.
    /// Returns the new version id.
    pub fn branch(
        &self,
        record_id: &str,
        branch_name: &str,
        from_version: Option<&str>,
    ) -> Result<String> {
        let parent_id = match from_version {
            Some(v) => v.to_string(),
            None => self
                .latest(record_id)
                .ok_or_else(|| EngramError::NotFound(format!("no history for {record_id}")))?,
        };

        let mut derived = self
            .get_version(record_id, Some(&parent_id))
            .ok_or_else(|| {
                EngramError::NotFound(format!("version {parent_id} of {record_id}"))
            })?;

        if !derived.tags.iter().any(|t| t == branch_name) {
            derived.tags.push(branch_name.to_string());
        }

        self.save_internal(
            &derived,
            &format!("branch:{branch_name}"),
            "history",
            Some(parent_id),
        )
    }

    /// Merge two records. Pure: callers persist the result explicitly.
    pub fn merge(a: &MemoryRecord, b: &MemoryRecord, strategy: MergeStrategy) -> MemoryRecord {
        let (earlier, later) = if a.last_accessed_at <= b.last_accessed_at {
            (a, b)
        } else {
            (b, a)
        };

        match strategy {
            MergeStrategy::Latest => later.clone(),
            MergeStrategy::Combine => {
                let mut merged = later.clone();
                for tag in &earlier.tags {
                    if !merged.tags.contains(tag) {
                        merged.tags.push(tag.clone());
                    }
                }
                for entity in &earlier.entities {
                    if !merged.entities.contains(entity) {
                        merged.entities.push(entity.clone());
                    }
                }
                merged.importance = later.importance.max(earlier.importance);
                merged.affect.valence = (earlier.affect.valence + later.affect.valence) / 2.0;
                merged.affect.arousal = (earlier.affect.arousal + later.affect.arousal) / 2.0;
                merged.affect.dominance =
                    (earlier.affect.dominance + later.affect.dominance) / 2.0;
                merged
            }
        }
    }

    /// Drop all but the `keep_latest` most recent versions of every record.
    /// The entry pointed to by LATEST is always preserved. Returns how many
    /// entries were removed.
    ///
    /// The cutoff is computed per record at the start of its pass, so this
    /// is safe to run concurrently with `save_version`: only entries
    /// strictly older than the cutoff are ever removed.
    pub fn garbage_collect(&self, keep_latest: usize) -> usize {
        let keep = keep_latest.max(1);
        let mut removed = 0;

        for mut log in self.logs.iter_mut() {
            let log = log.value_mut();
            if log.entries.len() <= keep {
                continue;
            }

            // Entries are appended in save order, so the tail is the most
            // recent even when timestamps tie.
            let cut = log.entries.len() - keep;
            let mut keep_ids: Vec<String> = log.entries[cut..]
                .iter()
                .map(|e| e.meta.version_id.clone())
                .collect();
            if let Some(latest) = &log.latest {
                if !keep_ids.contains(latest) {
                    keep_ids.push(latest.clone());
                }
            }

            let before = log.entries.len();
            log.entries.retain(|e| keep_ids.contains(&e.meta.version_id));
            removed += before - log.entries.len();
        }

        if removed > 0 {
            debug!(removed, keep_latest = keep, "history garbage collected");
        }
        removed
    }

    /// Number of stored versions for a record
    pub fn len(&self, record_id: &str) -> usize {
        self.logs.get(record_id).map(|l| l.entries.len()).unwrap_or(0)
    }

    /// Whether a record has any history
    pub fn is_empty(&self, record_id: &str) -> bool {
        self.len(record_id) == 0
    }

    fn save_internal(
        &self,
        record: &MemoryRecord,
        reason: &str,
        author: &str,
        parent_override: Option<String>,
    ) -> Result<String> {
        let snapshot = serde_json::to_string(record)?;
        let timestamp = Utc::now();
        let version_id = version_id(&record.id, timestamp, record.version);

        let mut log = self.logs.entry(record.id.clone()).or_default();
        let parent = parent_override.or_else(|| log.latest.clone());

        log.entries.push(VersionEntry {
            meta: VersionMeta {
                version_id: version_id.clone(),
                record_id: record.id.clone(),
                timestamp,
                reason: reason.to_string(),
                author: author.to_string(),
                parent_version_id: parent,
            },
            snapshot,
        });
        log.latest = Some(version_id.clone());

        Ok(version_id)
    }
}

impl Default for VersionedHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Content-addressed version id: hash of record id, timestamp, version
/// counter, and a process-unique salt so same-instant saves stay distinct.
fn version_id(record_id: &str, timestamp: DateTime<Utc>, version: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record_id.as_bytes());
    hasher.update(
        timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| timestamp.timestamp())
            .to_be_bytes(),
    );
    hasher.update(version.to_be_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare the tracked fields of two snapshots
fn tracked_field_changes(old: &MemoryRecord, new: &MemoryRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if old.content != new.content {
        changes.push(FieldChange {
            field: "content".to_string(),
            old: json!(old.content),
            new: json!(new.content),
        });
    }
    if (old.importance - new.importance).abs() > f32::EPSILON {
        changes.push(FieldChange {
            field: "importance".to_string(),
            old: json!(old.importance),
            new: json!(new.importance),
        });
    }
    if old.affect != new.affect {
        changes.push(FieldChange {
            field: "affect".to_string(),
            old: json!(old.affect),
            new: json!(new.affect),
        });
    }
    if old.tags != new.tags {
        changes.push(FieldChange {
            field: "tags".to_string(),
            old: json!(old.tags),
            new: json!(new.tags),
        });
    }
    if (old.retention_score - new.retention_score).abs() > f32::EPSILON {
        changes.push(FieldChange {
            field: "retention_score".to_string(),
            old: json!(old.retention_score),
            new: json!(new.retention_score),
        });
    }

    changes
}

/// Whether a change between two snapshots is worth a new version: any
/// tracked field other than the cached retention score differs.
pub fn is_meaningful_change(old: &MemoryRecord, new: &MemoryRecord) -> bool {
    tracked_field_changes(old, new)
        .iter()
        .any(|c| c.field != "retention_score")
}
