//! Background decay sweep
//!
//! Periodically recomputes cached retention scores, finds weakly-retained
//! records, and applies explicit reinforcement. All writes go through the
//! store's per-record locks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::RetentionConfig;
use crate::error::{EngramError, Result};
use crate::record::{MemoryRecord, RecordKind};
use crate::retention;
use crate::store::RecordStore;

/// Minimum score delta worth persisting. Smaller changes are skipped to
/// avoid version churn from the sweep.
const CHURN_THRESHOLD: f32 = 0.01;

/// Summary of one `update_all` pass
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Records examined
    pub scanned: usize,
    /// Records whose cached score was rewritten
    pub changed: usize,
    /// Records skipped because the delta was under the churn threshold
    pub unchanged: usize,
    /// Records that failed to persist (lock timeouts etc.)
    pub failed: usize,
    /// Ids of the rewritten records
    pub changed_ids: Vec<String>,
}

/// Recomputes and maintains cached retention scores against a shared store.
pub struct DecaySweep {
    store: Arc<RecordStore>,
    config: RetentionConfig,
}

impl DecaySweep {
    /// Create a sweep over the given store
    pub fn new(store: Arc<RecordStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// Current retention configuration
    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Recompute scores for every decaying record, persisting only deltas
    /// above the churn threshold. Yields to the runtime between batches so
    /// a large store does not starve other tasks.
    ///
    /// Tier summaries are owned by the consolidator and are not touched.
    pub async fn update_all(&self, batch_size: usize) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();
        let records = self.store.list_all();
        let batch_size = batch_size.max(1);

        for batch in records.chunks(batch_size) {
            for record in batch {
                if record.kind == RecordKind::TemporalSummary {
                    continue;
                }
                report.scanned += 1;

                let new_score = retention::score(record, 0.0, now, &self.config);
                if (new_score - record.retention_score).abs() <= CHURN_THRESHOLD {
                    report.unchanged += 1;
                    continue;
                }

                let outcome = self
                    .store
                    .update(record.kind, &record.id, move |mut next| {
                        next.set_retention_score(new_score);
                        next
                    })
                    .await;

                match outcome {
                    Ok(_) => {
                        report.changed += 1;
                        report.changed_ids.push(record.id.clone());
                    }
                    // Deleted while the sweep was running; nothing to score.
                    Err(EngramError::NotFound(_)) => {
                        report.unchanged += 1;
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(kind = %record.kind, id = %record.id, error = %err,
                            "decay sweep failed to persist score");
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        debug!(
            scanned = report.scanned,
            changed = report.changed,
            failed = report.failed,
            "decay sweep pass complete"
        );
        Ok(report)
    }

    /// Records whose current (freshly computed) score is below `threshold`,
    /// sorted ascending by score.
    pub fn find_below(&self, threshold: f32) -> Vec<MemoryRecord> {
        let now = Utc::now();
        let mut hits: Vec<(f32, MemoryRecord)> = self
            .store
            .list_all()
            .into_iter()
            .filter(|r| r.kind != RecordKind::TemporalSummary)
            .filter_map(|mut r| {
                let s = retention::score(&r, 0.0, now, &self.config);
                if s < threshold {
                    r.set_retention_score(s);
                    Some((s, r))
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.into_iter().map(|(_, r)| r).collect()
    }

    /// Explicitly reinforce a record: bump its reinforcement counter, boost
    /// the cached score by `reinforcement_boost * strength`, and refresh the
    /// access timestamp. Returns the new cached score.
    ///
    /// Reinforcing a missing (or concurrently deleted) record is `NotFound`;
    /// it never creates one.
    pub async fn reinforce(&self, kind: RecordKind, id: &str, strength: f32) -> Result<f32> {
        let boost = self.config.reinforcement_boost * strength.clamp(0.0, 1.0);
        self.store
            .update(kind, id, move |mut next| {
                next.reinforcement_count = next.reinforcement_count.saturating_add(1);
                next.last_accessed_at = Utc::now();
                let boosted = (next.retention_score + boost).min(1.0);
                next.set_retention_score(boosted);
                next
            })
            .await?;

        Ok(self
            .store
            .get(kind, id)
            .map(|r| r.retention_score)
            .unwrap_or(0.0))
    }
}
