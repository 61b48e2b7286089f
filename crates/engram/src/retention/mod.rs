//! Retention scoring
//!
//! A forgetting-curve model over record age, affect, access history, and
//! importance. Scoring is a pure function of the record plus a clock
//! reading; the cached `retention_score` on a record is derived state that
//! the decay sweep refreshes.
//!
//! With fixed attributes the score never increases over time: the time
//! factor decays exponentially past the recent window and the recency bonus
//! only steps down. Reserved tags impose per-tag floors that hold at any
//! age.

pub mod sweep;

pub use sweep::{DecaySweep, SweepReport};

use chrono::{DateTime, Utc};

use crate::config::RetentionConfig;
use crate::record::{MemoryRecord, RecordKind};

/// Tags whose presence marks a record as strongly emotional, routing it to
/// the slower emotional decay rate.
pub const STRONG_AFFECT_TAGS: [&str; 4] = ["love", "trust", "joy", "emotional_peak"];

/// Per-tag multipliers boosting specific tagged affects in the affect factor
const EMOTION_MULTIPLIERS: [(&str, f32); 3] = [("love", 2.0), ("trust", 1.8), ("joy", 1.5)];

/// Per-tag retention floors. Applied after clamping; the strongest
/// applicable floor wins.
const TAG_FLOORS: [(&str, f32); 4] = [
    ("milestone", 0.5),
    ("first_time", 0.5),
    ("emotional_peak", 0.6),
    ("protected", 0.7),
];

/// Compute a record's current retention score.
///
/// `connection_strength` is a caller-supplied relational-strength input in
/// [0, 1]; pass 0.0 when no relationship context applies. The result is
/// always within `[config.min_recall, 1.0]`, raised further by any
/// reserved-tag floor.
pub fn score(
    record: &MemoryRecord,
    connection_strength: f32,
    now: DateTime<Utc>,
    config: &RetentionConfig,
) -> f32 {
    let age_hours = hours_between(record.created_at, now);

    let time_factor = if age_hours <= config.recent_window_hours {
        1.0
    } else {
        let rate = decay_rate(record, config);
        let mut factor = (-rate * (age_hours - config.recent_window_hours)).exp();
        if age_hours > config.ancient_threshold_hours {
            factor *= config.ancient_acceleration;
        }
        factor
    };

    let affect_factor = clamp01(
        0.4 * record.affect.valence.abs()
            + 0.3 * emotion_multiplier(record)
            + 0.3 * connection_strength,
    );

    let access_factor = clamp01(
        1.0 - (-0.2 * record.access_count as f32).exp()
            + recency_bonus(record.last_accessed_at, now)
            + record.reinforcement_count as f32 * 0.15,
    );

    let importance_factor = if record.importance >= config.significance_threshold {
        0.8 + 0.2 * record.importance
    } else {
        record.importance
    };

    let raw = (config.time_weight * time_factor
        + config.affect_weight * affect_factor
        + config.access_weight * access_factor
        + config.importance_weight * importance_factor)
        * type_modifier(record.kind);

    let clamped = raw.clamp(config.min_recall, 1.0);
    clamped.max(tag_floor(record))
}

/// Pick the per-hour decay rate for a record
fn decay_rate(record: &MemoryRecord, config: &RetentionConfig) -> f32 {
    let strongly_emotional = record.affect.valence.abs() > 0.7
        || record
            .tags
            .iter()
            .any(|t| STRONG_AFFECT_TAGS.contains(&t.as_str()));

    if strongly_emotional {
        config.emotional_decay_rate
    } else if record.kind == RecordKind::WorkContext {
        config.technical_decay_rate
    } else {
        config.base_decay_rate
    }
}

/// Boost from tagged affects; 1.0 when no boosting tag is present
fn emotion_multiplier(record: &MemoryRecord) -> f32 {
    EMOTION_MULTIPLIERS
        .iter()
        .filter(|(tag, _)| record.tags.iter().any(|t| t == tag))
        .map(|(_, mult)| *mult)
        .fold(1.0_f32, f32::max)
}

/// Step bonus for recent access: +0.3 within 7 days, +0.1 within 30
fn recency_bonus(last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let hours = hours_between(last_accessed, now);
    if hours <= 7.0 * 24.0 {
        0.3
    } else if hours <= 30.0 * 24.0 {
        0.1
    } else {
        0.0
    }
}

/// Per-kind multiplier on the blended score
fn type_modifier(kind: RecordKind) -> f32 {
    match kind {
        RecordKind::AffectSample => 0.5,
        RecordKind::WorkContext => 1.2,
        _ => 1.0,
    }
}

/// Strongest retention floor imposed by reserved tags, 0.0 when none apply
fn tag_floor(record: &MemoryRecord) -> f32 {
    TAG_FLOORS
        .iter()
        .filter(|(tag, _)| record.tags.iter().any(|t| t == tag))
        .map(|(_, floor)| *floor)
        .fold(0.0_f32, f32::max)
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f32 {
    let seconds = (later - earlier).num_seconds();
    (seconds.max(0) as f32) / 3600.0
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}
