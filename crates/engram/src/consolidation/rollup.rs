//! Rollup pipeline
//!
//! `Consolidator` reads a time window from the store, aggregates it into a
//! `TierSummaryPayload`, applies the tier's compression ratio, deep-merges
//! with any existing summary for the bucket, and persists the result with a
//! single upsert. Running the same window twice over unchanged inputs
//! produces identical content modulo the `consolidated_at` stamp.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::consolidation::{ConsolidationTier, TierSummaryPayload};
use crate::error::{EngramError, Result};
use crate::record::{MemoryRecord, RecordKind};
use crate::store::RecordStore;

/// Content markers that flag a record as an accomplishment
pub const ACCOMPLISHMENT_MARKERS: [&str; 8] = [
    "completed", "finished", "shipped", "fixed", "achieved", "built", "launched", "solved",
];

/// How many dominant affect tags a summary keeps
const DOMINANT_TAG_LIMIT: usize = 5;

/// Maximum characters kept per accomplishment snippet
const SNIPPET_LIMIT: usize = 120;

/// Result of one consolidation pass
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    /// Tier that was consolidated
    pub tier: ConsolidationTier,
    /// Bucket key that was covered
    pub bucket: String,
    /// How many input records fed the pass
    pub input_count: usize,
    /// Id of the summary record, when one was written
    pub summary_id: Option<String>,
    /// Version of the summary record after the write
    pub summary_version: Option<u64>,
}

/// Scheduled rollup pipeline over a shared store.
pub struct Consolidator {
    store: Arc<RecordStore>,
}

impl Consolidator {
    /// Create a consolidator over the given store
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Consolidate the bucket containing `now` for one tier
    pub async fn run_current(
        &self,
        tier: ConsolidationTier,
        now: DateTime<Utc>,
    ) -> Result<ConsolidationReport> {
        self.consolidate(tier, tier.bucket_start(now), now).await
    }

    /// Consolidate one tier over an explicit window.
    ///
    /// The bucket key is derived from `window_start`. The merged summary is
    /// computed fully in memory before a single store write; a failure here
    /// leaves any existing summary untouched and the window is simply
    /// retried on the next cycle.
    pub async fn consolidate(
        &self,
        tier: ConsolidationTier,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<ConsolidationReport> {
        let bucket = tier.bucket_key(window_start);
        let inputs = self.collect_inputs(tier, window_start, window_end).await;

        if inputs.is_empty() {
            debug!(tier = %tier, bucket, "no inputs in window, skipping");
            return Ok(ConsolidationReport {
                tier,
                bucket,
                input_count: 0,
                summary_id: None,
                summary_version: None,
            });
        }

        let input_count = inputs.len();
        let payload = match tier.source_tier() {
            None => aggregate_raw(tier, &bucket, &inputs),
            Some(_) => aggregate_summaries(tier, &bucket, &inputs)?,
        };

        let summary_id = format!("{}:{}", tier.as_str(), bucket);
        let existing = self
            .store
            .get(RecordKind::TemporalSummary, &summary_id)
            .map(|record| serde_json::from_str::<TierSummaryPayload>(&record.content))
            .transpose()
            .map_err(|e| EngramError::Consolidation {
                tier: tier.to_string(),
                bucket: bucket.clone(),
                message: format!("existing summary is unreadable: {e}"),
            })?;

        let merged = match existing {
            Some(previous) => TierSummaryPayload::merge(&previous, payload),
            None => payload,
        };

        let content = serde_json::to_string(&merged)?;
        let id_for_mutator = summary_id.clone();
        let version = self
            .store
            .upsert(RecordKind::TemporalSummary, &summary_id, move |old| {
                let mut record = old.unwrap_or_else(|| {
                    let mut fresh = MemoryRecord::new(
                        RecordKind::TemporalSummary,
                        &id_for_mutator,
                        "",
                    );
                    // Summaries sort into the time index by the window they
                    // cover, not by when consolidation happened to run.
                    fresh.created_at = window_start;
                    fresh.last_accessed_at = window_start;
                    fresh
                });
                record.content = content;
                record
            })
            .await
            .map_err(|e| EngramError::Consolidation {
                tier: tier.to_string(),
                bucket: bucket.clone(),
                message: e.to_string(),
            })?;

        debug!(tier = %tier, bucket, inputs = input_count, version, "bucket consolidated");
        Ok(ConsolidationReport {
            tier,
            bucket,
            input_count,
            summary_id: Some(summary_id),
            summary_version: Some(version),
        })
    }

    async fn collect_inputs(
        &self,
        tier: ConsolidationTier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MemoryRecord> {
        match tier.source_tier() {
            None => {
                let mut inputs = Vec::new();
                for kind in ConsolidationTier::raw_source_kinds() {
                    inputs.extend(self.store.range_by_time(kind, start, end).await);
                }
                inputs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                inputs
            }
            Some(source) => {
                let prefix = format!("{}:", source.as_str());
                self.store
                    .range_by_time(RecordKind::TemporalSummary, start, end)
                    .await
                    .into_iter()
                    .filter(|r| r.id.starts_with(&prefix))
                    .collect()
            }
        }
    }
}

/// Aggregate raw records into an Immediate-tier payload
fn aggregate_raw(
    tier: ConsolidationTier,
    bucket: &str,
    inputs: &[MemoryRecord],
) -> TierSummaryPayload {
    let mut tag_counts: HashMap<&str, u32> = HashMap::new();
    let mut key_moments = Vec::new();
    let mut accomplishments = Vec::new();
    let mut entity_sums: BTreeMap<String, (f32, u32)> = BTreeMap::new();
    let mut source_ids = Vec::new();

    for record in inputs {
        source_ids.push(record.id.clone());

        for tag in &record.tags {
            *tag_counts.entry(tag.as_str()).or_default() += 1;
        }

        if record.has_reserved_tag() {
            key_moments.push(record.id.clone());
        }

        let lower = record.content.to_lowercase();
        if ACCOMPLISHMENT_MARKERS.iter().any(|m| lower.contains(m)) {
            accomplishments.push(snippet(&record.content));
        }

        for entity in &record.entities {
            let slot = entity_sums.entry(entity.clone()).or_insert((0.0, 0));
            slot.0 += record.affect.valence;
            slot.1 += 1;
        }
    }

    let ratio = tier.compression_ratio();
    truncate_ratio(&mut key_moments, ratio);
    truncate_ratio(&mut accomplishments, ratio);

    TierSummaryPayload {
        tier,
        bucket: bucket.to_string(),
        record_count: inputs.len() as u32,
        dominant_affect_tags: rank_tags(tag_counts),
        key_moments,
        accomplishments,
        entity_affects: entity_sums
            .into_iter()
            .map(|(entity, (sum, count))| (entity, sum / count.max(1) as f32))
            .collect(),
        source_ids,
        consolidated_at: Utc::now(),
    }
}

/// Aggregate lower-tier summaries into a coarser payload
fn aggregate_summaries(
    tier: ConsolidationTier,
    bucket: &str,
    inputs: &[MemoryRecord],
) -> Result<TierSummaryPayload> {
    let mut record_count: u32 = 0;
    let mut tag_counts: HashMap<String, u32> = HashMap::new();
    let mut key_moments = Vec::new();
    let mut accomplishments = Vec::new();
    let mut entity_sums: BTreeMap<String, (f32, u32)> = BTreeMap::new();
    let mut source_ids = Vec::new();

    for record in inputs {
        source_ids.push(record.id.clone());

        let child: TierSummaryPayload = match serde_json::from_str(&record.content) {
            Ok(payload) => payload,
            Err(err) => {
                // A single unreadable child must not sink the whole bucket.
                warn!(id = %record.id, error = %err, "skipping unreadable child summary");
                record_count += 1;
                continue;
            }
        };

        record_count += child.record_count;
        for tag in child.dominant_affect_tags {
            *tag_counts.entry(tag).or_default() += 1;
        }
        key_moments.extend(child.key_moments);
        accomplishments.extend(child.accomplishments);
        for (entity, valence) in child.entity_affects {
            let slot = entity_sums.entry(entity).or_insert((0.0, 0));
            slot.0 += valence;
            slot.1 += 1;
        }
    }

    let ratio = tier.compression_ratio();
    truncate_ratio(&mut key_moments, ratio);
    truncate_ratio(&mut accomplishments, ratio);

    Ok(TierSummaryPayload {
        tier,
        bucket: bucket.to_string(),
        record_count,
        dominant_affect_tags: rank_tags(
            tag_counts.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
        ),
        key_moments,
        accomplishments,
        entity_affects: entity_sums
            .into_iter()
            .map(|(entity, (sum, count))| (entity, sum / count.max(1) as f32))
            .collect(),
        source_ids,
        consolidated_at: Utc::now(),
    })
}

/// Frequency-rank tags: count descending, then name ascending for
/// deterministic output. Keeps the top few.
fn rank_tags(counts: HashMap<&str, u32>) -> Vec<String> {
    let mut ranked: Vec<(&str, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(DOMINANT_TAG_LIMIT)
        .map(|(tag, _)| tag.to_string())
        .collect()
}

/// Keep the leading `ceil(ratio * len)` items
fn truncate_ratio(list: &mut Vec<String>, ratio: f32) {
    if list.is_empty() {
        return;
    }
    let keep = (ratio * list.len() as f32).ceil() as usize;
    list.truncate(keep.max(1));
}

fn snippet(content: &str) -> String {
    content.chars().take(SNIPPET_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Arc<RecordStore>, Consolidator) {
        let store = Arc::new(RecordStore::new(&StoreConfig::default()));
        let consolidator = Consolidator::new(Arc::clone(&store));
        (store, consolidator)
    }

    async fn seed_conversation(
        store: &RecordStore,
        id: &str,
        created: DateTime<Utc>,
        content: &str,
        tags: Vec<String>,
    ) {
        let id_owned = id.to_string();
        let content_owned = content.to_string();
        store
            .upsert(RecordKind::Conversation, id, move |_| {
                let mut r = MemoryRecord::new(RecordKind::Conversation, &id_owned, content_owned);
                r.created_at = created;
                r.last_accessed_at = created;
                r.tags = tags;
                r
            })
            .await
            .unwrap();
    }

    fn hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_immediate_counts_and_key_moments() {
        let (store, consolidator) = setup();
        let start = hour();
        for i in 0..50 {
            let tags = if i < 3 {
                vec!["milestone".to_string()]
            } else {
                Vec::new()
            };
            seed_conversation(
                &store,
                &format!("c{i}"),
                start + Duration::seconds(i),
                "talked about the weather",
                tags,
            )
            .await;
        }

        let report = consolidator
            .consolidate(
                ConsolidationTier::Immediate,
                start,
                start + Duration::minutes(59),
            )
            .await
            .unwrap();

        assert_eq!(report.input_count, 50);
        let summary = store
            .get(RecordKind::TemporalSummary, report.summary_id.as_ref().unwrap())
            .unwrap();
        let payload: TierSummaryPayload = serde_json::from_str(&summary.content).unwrap();
        assert_eq!(payload.record_count, 50);
        // Immediate compression ratio is 1.0: every tagged moment survives.
        assert_eq!(payload.key_moments, vec!["c0", "c1", "c2"]);
        assert_eq!(payload.source_ids.len(), 50);
    }

    #[tokio::test]
    async fn test_idempotent_reconsolidation() {
        let (store, consolidator) = setup();
        let start = hour();
        for i in 0..10 {
            seed_conversation(
                &store,
                &format!("c{i}"),
                start + Duration::seconds(i),
                "shipped the release",
                vec!["joy".to_string()],
            )
            .await;
        }

        let window_end = start + Duration::minutes(59);
        let first = consolidator
            .consolidate(ConsolidationTier::Immediate, start, window_end)
            .await
            .unwrap();
        let first_summary = store
            .get(RecordKind::TemporalSummary, first.summary_id.as_ref().unwrap())
            .unwrap();
        let first_payload: TierSummaryPayload =
            serde_json::from_str(&first_summary.content).unwrap();

        let second = consolidator
            .consolidate(ConsolidationTier::Immediate, start, window_end)
            .await
            .unwrap();
        let second_summary = store
            .get(RecordKind::TemporalSummary, second.summary_id.as_ref().unwrap())
            .unwrap();
        let second_payload: TierSummaryPayload =
            serde_json::from_str(&second_summary.content).unwrap();

        assert!(first_payload.same_content(&second_payload));
        assert_eq!(second_summary.version, first_summary.version + 1);
    }

    #[tokio::test]
    async fn test_accomplishment_extraction() {
        let (store, consolidator) = setup();
        let start = hour();
        seed_conversation(&store, "c0", start, "Fixed the flaky test suite", vec![]).await;
        seed_conversation(&store, "c1", start + Duration::seconds(1), "idle chatter", vec![])
            .await;

        let report = consolidator
            .consolidate(ConsolidationTier::Immediate, start, start + Duration::hours(1))
            .await
            .unwrap();

        let summary = store
            .get(RecordKind::TemporalSummary, report.summary_id.as_ref().unwrap())
            .unwrap();
        let payload: TierSummaryPayload = serde_json::from_str(&summary.content).unwrap();
        assert_eq!(payload.accomplishments.len(), 1);
        assert!(payload.accomplishments[0].contains("Fixed"));
    }

    #[tokio::test]
    async fn test_short_term_rolls_up_immediate_summaries() {
        let (store, consolidator) = setup();
        let day_start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for hour_offset in [9_i64, 10] {
            let bucket_start = day_start + Duration::hours(hour_offset);
            for i in 0..4 {
                seed_conversation(
                    &store,
                    &format!("c-{hour_offset}-{i}"),
                    bucket_start + Duration::minutes(i),
                    "said something",
                    if i == 0 {
                        vec!["milestone".to_string()]
                    } else {
                        vec![]
                    },
                )
                .await;
            }
            consolidator
                .consolidate(
                    ConsolidationTier::Immediate,
                    bucket_start,
                    bucket_start + Duration::minutes(59),
                )
                .await
                .unwrap();
        }

        let report = consolidator
            .consolidate(
                ConsolidationTier::ShortTerm,
                day_start,
                day_start + Duration::hours(23),
            )
            .await
            .unwrap();

        assert_eq!(report.input_count, 2);
        let summary = store
            .get(RecordKind::TemporalSummary, report.summary_id.as_ref().unwrap())
            .unwrap();
        let payload: TierSummaryPayload = serde_json::from_str(&summary.content).unwrap();
        assert_eq!(payload.record_count, 8);
        // Ratio 0.5 over two key moments keeps one.
        assert_eq!(payload.key_moments.len(), 1);
        assert_eq!(payload.tier, ConsolidationTier::ShortTerm);
    }

    #[tokio::test]
    async fn test_empty_window_writes_nothing() {
        let (store, consolidator) = setup();
        let start = hour();
        let report = consolidator
            .consolidate(ConsolidationTier::Immediate, start, start + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.input_count, 0);
        assert!(report.summary_id.is_none());
        assert_eq!(store.count(RecordKind::TemporalSummary), 0);
    }

    #[test]
    fn test_truncate_ratio_keeps_at_least_one() {
        let mut items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        truncate_ratio(&mut items, 0.1);
        assert_eq!(items.len(), 1);

        let mut all = vec!["a".to_string(), "b".to_string()];
        truncate_ratio(&mut all, 1.0);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_rank_tags_deterministic() {
        let mut counts = HashMap::new();
        counts.insert("joy", 3);
        counts.insert("calm", 3);
        counts.insert("anger", 1);
        let ranked = rank_tags(counts);
        assert_eq!(ranked, vec!["calm", "joy", "anger"]);
    }
}
