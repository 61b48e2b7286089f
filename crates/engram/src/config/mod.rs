//! Engine configuration
//!
//! All tunables recognized by the engine, loadable from TOML. Every field
//! has a default matching the documented engine behavior, so an empty file
//! (or no file at all) yields a working configuration.

use serde::Deserialize;
use std::path::Path;

use crate::error::{EngramError, Result};

/// Main configuration structure for the engine
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Record store configuration (locking, change fan-out)
    #[serde(default)]
    pub store: StoreConfig,
    /// Retention scoring and decay-sweep configuration
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Tier consolidation cadence configuration
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Version history configuration
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| EngramError::Serialization(e.to_string()))
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist. A malformed file is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// How long an upsert waits for a per-record lock before failing
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    /// Capacity of the change-notification broadcast channel. Slow
    /// subscribers past this depth drop events rather than block writers.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_seconds: default_lock_timeout_seconds(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_lock_timeout_seconds() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    256
}

/// Retention scoring configuration
///
/// The specific rate and weight values are empirically chosen defaults, not
/// derived constants; the engine only relies on decay being monotone and the
/// floors holding.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Records younger than this experience no time decay (hours)
    #[serde(default = "default_recent_window_hours")]
    pub recent_window_hours: f32,
    /// Decay rate per hour for ordinary records
    #[serde(default = "default_base_decay_rate")]
    pub base_decay_rate: f32,
    /// Decay rate per hour for strongly emotional records
    #[serde(default = "default_emotional_decay_rate")]
    pub emotional_decay_rate: f32,
    /// Decay rate per hour for technical/work-context records
    #[serde(default = "default_technical_decay_rate")]
    pub technical_decay_rate: f32,
    /// Age past which the extra acceleration factor applies (hours)
    #[serde(default = "default_ancient_threshold_hours")]
    pub ancient_threshold_hours: f32,
    /// Extra multiplier applied to the time factor past the ancient threshold
    #[serde(default = "default_ancient_acceleration")]
    pub ancient_acceleration: f32,
    /// Lower bound of every retention score
    #[serde(default = "default_min_recall")]
    pub min_recall: f32,
    /// Importance at or above this gets the significance boost (normalized)
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f32,
    /// Score boost per unit of reinforcement strength
    #[serde(default = "default_reinforcement_boost")]
    pub reinforcement_boost: f32,
    /// Weight of the time factor in the blended score
    #[serde(default = "default_time_weight")]
    pub time_weight: f32,
    /// Weight of the affect factor in the blended score
    #[serde(default = "default_affect_weight")]
    pub affect_weight: f32,
    /// Weight of the access factor in the blended score
    #[serde(default = "default_access_weight")]
    pub access_weight: f32,
    /// Weight of the importance factor in the blended score
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,
    /// How often the background decay sweep runs (seconds)
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// How many records one sweep batch recomputes before yielding
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            recent_window_hours: default_recent_window_hours(),
            base_decay_rate: default_base_decay_rate(),
            emotional_decay_rate: default_emotional_decay_rate(),
            technical_decay_rate: default_technical_decay_rate(),
            ancient_threshold_hours: default_ancient_threshold_hours(),
            ancient_acceleration: default_ancient_acceleration(),
            min_recall: default_min_recall(),
            significance_threshold: default_significance_threshold(),
            reinforcement_boost: default_reinforcement_boost(),
            time_weight: default_time_weight(),
            affect_weight: default_affect_weight(),
            access_weight: default_access_weight(),
            importance_weight: default_importance_weight(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

fn default_recent_window_hours() -> f32 {
    168.0
}

fn default_base_decay_rate() -> f32 {
    0.05
}

fn default_emotional_decay_rate() -> f32 {
    0.02
}

fn default_technical_decay_rate() -> f32 {
    0.08
}

fn default_ancient_threshold_hours() -> f32 {
    4320.0
}

fn default_ancient_acceleration() -> f32 {
    0.7
}

fn default_min_recall() -> f32 {
    0.1
}

fn default_significance_threshold() -> f32 {
    0.8
}

fn default_reinforcement_boost() -> f32 {
    0.15
}

fn default_time_weight() -> f32 {
    0.4
}

fn default_affect_weight() -> f32 {
    0.3
}

fn default_access_weight() -> f32 {
    0.2
}

fn default_importance_weight() -> f32 {
    0.1
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

fn default_sweep_batch_size() -> usize {
    100
}

/// Tier consolidation cadence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Seconds between immediate-tier (hourly bucket) consolidations
    #[serde(default = "default_immediate_cycle_seconds")]
    pub immediate_cycle_seconds: u64,
    /// Seconds between short-term (daily bucket) consolidations
    #[serde(default = "default_short_term_cycle_seconds")]
    pub short_term_cycle_seconds: u64,
    /// Seconds between long-term (weekly/monthly bucket) consolidations
    #[serde(default = "default_long_term_cycle_seconds")]
    pub long_term_cycle_seconds: u64,
    /// Seconds between lifetime (yearly bucket) consolidations
    #[serde(default = "default_lifetime_cycle_seconds")]
    pub lifetime_cycle_seconds: u64,
}

impl ConsolidationConfig {
    /// Cycle length for one tier's consolidation loop
    pub fn cycle_seconds(&self, tier: crate::consolidation::ConsolidationTier) -> u64 {
        use crate::consolidation::ConsolidationTier::*;
        match tier {
            Immediate => self.immediate_cycle_seconds,
            ShortTerm => self.short_term_cycle_seconds,
            LongTerm => self.long_term_cycle_seconds,
            Lifetime => self.lifetime_cycle_seconds,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            immediate_cycle_seconds: default_immediate_cycle_seconds(),
            short_term_cycle_seconds: default_short_term_cycle_seconds(),
            long_term_cycle_seconds: default_long_term_cycle_seconds(),
            lifetime_cycle_seconds: default_lifetime_cycle_seconds(),
        }
    }
}

fn default_immediate_cycle_seconds() -> u64 {
    3600
}

fn default_short_term_cycle_seconds() -> u64 {
    86_400
}

fn default_long_term_cycle_seconds() -> u64 {
    604_800
}

fn default_lifetime_cycle_seconds() -> u64 {
    31_536_000
}

/// Version history configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// How many versions garbage collection keeps per record
    #[serde(default = "default_keep_latest_versions")]
    pub keep_latest_versions: usize,
    /// How often the background garbage collection runs (seconds)
    #[serde(default = "default_gc_interval_seconds")]
    pub gc_interval_seconds: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            keep_latest_versions: default_keep_latest_versions(),
            gc_interval_seconds: default_gc_interval_seconds(),
        }
    }
}

fn default_keep_latest_versions() -> usize {
    10
}

fn default_gc_interval_seconds() -> u64 {
    3600
}
