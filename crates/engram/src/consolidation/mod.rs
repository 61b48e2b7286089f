//! Tier consolidation
//!
//! Rolls fine-grained records up into coarser time-scale summaries:
//! hourly buckets from raw records, then daily, monthly, and yearly buckets
//! from the tier below. Each tier applies a compression ratio bounding how
//! much raw detail survives into the summary payload.

pub mod rollup;

pub use rollup::{ConsolidationReport, Consolidator};

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::record::RecordKind;

/// The four consolidation tiers, finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationTier {
    /// Hourly buckets over raw records (last 24h of detail)
    Immediate,
    /// Daily buckets over immediate summaries (last 7d)
    ShortTerm,
    /// Monthly buckets over short-term summaries (last 30d)
    LongTerm,
    /// Yearly buckets over long-term summaries, essence only
    Lifetime,
}

impl ConsolidationTier {
    /// All tiers, finest first
    pub const ALL: [ConsolidationTier; 4] = [
        ConsolidationTier::Immediate,
        ConsolidationTier::ShortTerm,
        ConsolidationTier::LongTerm,
        ConsolidationTier::Lifetime,
    ];

    /// Stable string form, used in summary record ids
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationTier::Immediate => "immediate",
            ConsolidationTier::ShortTerm => "short_term",
            ConsolidationTier::LongTerm => "long_term",
            ConsolidationTier::Lifetime => "lifetime",
        }
    }

    /// The tier whose summaries feed this one; `None` for Immediate, which
    /// reads raw records.
    pub fn source_tier(&self) -> Option<ConsolidationTier> {
        match self {
            ConsolidationTier::Immediate => None,
            ConsolidationTier::ShortTerm => Some(ConsolidationTier::Immediate),
            ConsolidationTier::LongTerm => Some(ConsolidationTier::ShortTerm),
            ConsolidationTier::Lifetime => Some(ConsolidationTier::LongTerm),
        }
    }

    /// Fraction of raw detail retained in this tier's summaries
    pub fn compression_ratio(&self) -> f32 {
        match self {
            ConsolidationTier::Immediate => 1.0,
            ConsolidationTier::ShortTerm => 0.5,
            ConsolidationTier::LongTerm => 0.2,
            ConsolidationTier::Lifetime => 0.1,
        }
    }

    /// Bucket key for the bucket containing `t`
    pub fn bucket_key(&self, t: DateTime<Utc>) -> String {
        match self {
            ConsolidationTier::Immediate => t.format("%Y-%m-%dT%H").to_string(),
            ConsolidationTier::ShortTerm => t.format("%Y-%m-%d").to_string(),
            ConsolidationTier::LongTerm => t.format("%Y-%m").to_string(),
            ConsolidationTier::Lifetime => t.format("%Y").to_string(),
        }
    }

    /// Start of the bucket containing `t`
    pub fn bucket_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        match self {
            ConsolidationTier::Immediate => Utc
                .with_ymd_and_hms(date.year(), date.month(), date.day(), t.hour(), 0, 0)
                .single()
                .unwrap_or(t),
            ConsolidationTier::ShortTerm => Utc
                .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
                .single()
                .unwrap_or(t),
            ConsolidationTier::LongTerm => Utc
                .with_ymd_and_hms(date.year(), date.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(t),
            ConsolidationTier::Lifetime => Utc
                .with_ymd_and_hms(date.year(), 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(t),
        }
    }

    /// Summary record id for the bucket containing `t`
    pub fn summary_id(&self, t: DateTime<Utc>) -> String {
        format!("{}:{}", self.as_str(), self.bucket_key(t))
    }

    /// Raw record kinds read by the Immediate tier
    pub fn raw_source_kinds() -> [RecordKind; 6] {
        [
            RecordKind::Conversation,
            RecordKind::AffectSample,
            RecordKind::EntityState,
            RecordKind::RelationshipEdge,
            RecordKind::WorkContext,
            RecordKind::DerivedState,
        ]
    }
}

impl std::fmt::Display for ConsolidationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured payload stored inside a tier summary record's content.
///
/// Summaries reference constituent records by id; they never copy payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSummaryPayload {
    /// Which tier produced this summary
    pub tier: ConsolidationTier,
    /// Bucket key this summary covers
    pub bucket: String,
    /// How many constituent records/messages the bucket held
    pub record_count: u32,
    /// Frequency-ranked dominant affect tags
    pub dominant_affect_tags: Vec<String>,
    /// Ids of records carrying reserved tags, ratio-bounded
    pub key_moments: Vec<String>,
    /// Pattern-matched accomplishment snippets, ratio-bounded
    pub accomplishments: Vec<String>,
    /// Mean affect valence per entity seen in the bucket
    pub entity_affects: BTreeMap<String, f32>,
    /// Ids of every constituent record
    pub source_ids: Vec<String>,
    /// When this summary was (last) produced. Excluded from idempotence
    /// comparisons.
    pub consolidated_at: DateTime<Utc>,
}

impl TierSummaryPayload {
    /// An empty payload for a bucket
    pub fn empty(tier: ConsolidationTier, bucket: impl Into<String>) -> Self {
        Self {
            tier,
            bucket: bucket.into(),
            record_count: 0,
            dominant_affect_tags: Vec::new(),
            key_moments: Vec::new(),
            accomplishments: Vec::new(),
            entity_affects: BTreeMap::new(),
            source_ids: Vec::new(),
            consolidated_at: Utc::now(),
        }
    }

    /// Deep-merge `newer` into an existing payload: lists concatenate (with
    /// id lists deduplicated so partial re-runs stay idempotent), scalars
    /// and map entries overwrite.
    pub fn merge(existing: &TierSummaryPayload, newer: TierSummaryPayload) -> TierSummaryPayload {
        let mut merged = existing.clone();

        merged.record_count = newer.record_count;
        merged.consolidated_at = newer.consolidated_at;

        concat_dedup(&mut merged.dominant_affect_tags, newer.dominant_affect_tags);
        concat_dedup(&mut merged.key_moments, newer.key_moments);
        concat_dedup(&mut merged.accomplishments, newer.accomplishments);
        concat_dedup(&mut merged.source_ids, newer.source_ids);

        for (entity, valence) in newer.entity_affects {
            merged.entity_affects.insert(entity, valence);
        }

        merged
    }

    /// Equality ignoring the `consolidated_at` timestamp
    pub fn same_content(&self, other: &TierSummaryPayload) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.consolidated_at = b.consolidated_at;
        a == b
    }
}

fn concat_dedup(target: &mut Vec<String>, newer: Vec<String>) {
    for item in newer {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
