//! Engine wiring and background scheduling
//!
//! `Engine` owns every component behind explicit construction; there is no
//! module-level mutable state. Producers call `ingest`/`recall`/`reinforce`;
//! `start` spawns the periodic decay sweep, one consolidation loop per tier,
//! history garbage collection, and the change snapshotter. Background loops
//! log failures and keep going; a bad window or record never halts the
//! scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::consolidation::{ConsolidationTier, Consolidator};
use crate::error::{EngramError, Result};
use crate::history::{self, VersionedHistory};
use crate::record::{Affect, MemoryRecord, RecordKind};
use crate::retention::{self, DecaySweep};
use crate::store::{ChangeAction, ChangeEvent, RecordStore};

/// Everything a caller supplies to ingest one record
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Record kind
    pub kind: RecordKind,
    /// Record id
    pub id: String,
    /// Serialized payload
    pub content: String,
    /// Caller-supplied affect vector
    pub affect: Affect,
    /// Caller-supplied significance prior, in [0, 1]
    pub importance: f32,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Entities this record concerns
    pub entities: Vec<String>,
}

/// The consolidation engine: store, scorer, consolidator, and history wired
/// together behind one constructor.
pub struct Engine {
    config: Config,
    store: Arc<RecordStore>,
    history: Arc<VersionedHistory>,
    sweep: Arc<DecaySweep>,
    consolidator: Arc<Consolidator>,
}

impl Engine {
    /// Build an engine from configuration
    pub fn new(config: Config) -> Self {
        let store = Arc::new(RecordStore::new(&config.store));
        let history = Arc::new(VersionedHistory::new());
        let sweep = Arc::new(DecaySweep::new(
            Arc::clone(&store),
            config.retention.clone(),
        ));
        let consolidator = Arc::new(Consolidator::new(Arc::clone(&store)));
        Self {
            config,
            store,
            history,
            sweep,
            consolidator,
        }
    }

    /// Shared record store
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Shared version history
    pub fn history(&self) -> &Arc<VersionedHistory> {
        &self.history
    }

    /// The decay sweep component
    pub fn sweep(&self) -> &Arc<DecaySweep> {
        &self.sweep
    }

    /// The consolidator component
    pub fn consolidator(&self) -> &Arc<Consolidator> {
        &self.consolidator
    }

    /// Subscribe to the change-notification stream
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    /// Ingest one record. Validation happens before any lock is acquired;
    /// malformed input fails fast without touching the store.
    ///
    /// An existing record keeps its counters and creation time; content,
    /// affect, importance, tags, and entities are overwritten.
    pub async fn ingest(&self, request: IngestRequest) -> Result<u64> {
        let shell = {
            let mut record = MemoryRecord::new(request.kind, &request.id, &request.content);
            record.affect = request.affect;
            record.importance = request.importance;
            record.tags = request.tags;
            record.entities = request.entities;
            record.validate()?;
            record
        };

        let config = self.config.retention.clone();
        self.store
            .upsert(request.kind, &request.id, move |old| {
                let mut next = match old {
                    None => shell,
                    Some(mut existing) => {
                        existing.content = shell.content;
                        existing.affect = shell.affect;
                        existing.importance = shell.importance;
                        existing.tags = shell.tags;
                        existing.entities = shell.entities;
                        existing
                    }
                };
                // Scored after the merge so an updated record keeps the age
                // and access history it has actually accrued.
                let score = retention::score(&next, 0.0, Utc::now(), &config);
                next.set_retention_score(score);
                next
            })
            .await
    }

    /// Read a record, refreshing its access statistics and cached score.
    /// Returns `Ok(None)` for a missing record; reads never error on
    /// absence.
    pub async fn recall(&self, kind: RecordKind, id: &str) -> Result<Option<MemoryRecord>> {
        let config = self.config.retention.clone();
        let outcome = self
            .store
            .update(kind, id, move |mut record| {
                record.mark_accessed();
                let score = retention::score(&record, 0.0, Utc::now(), &config);
                record.set_retention_score(score);
                record
            })
            .await;

        match outcome {
            Ok(_) => Ok(self.store.get(kind, id)),
            // Missing, or deleted while we waited for the lock. Either way
            // the record is gone and nothing was written.
            Err(EngramError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Explicitly reinforce a record
    pub async fn reinforce(&self, kind: RecordKind, id: &str, strength: f32) -> Result<f32> {
        self.sweep.reinforce(kind, id, strength).await
    }

    /// Spawn the background tasks. Each loop exits cleanly between units of
    /// work when `shutdown` flips to `true`.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(self.spawn_decay_loop(shutdown.clone()));
        for tier in ConsolidationTier::ALL {
            handles.push(self.spawn_consolidation_loop(tier, shutdown.clone()));
        }
        handles.push(self.spawn_gc_loop(shutdown.clone()));
        handles.push(self.spawn_snapshotter(shutdown));

        info!(tasks = handles.len(), "engine background tasks started");
        handles
    }

    fn spawn_decay_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let sweep = Arc::clone(&self.sweep);
        let interval_secs = self.config.retention.sweep_interval_seconds;
        let batch_size = self.config.retention.sweep_batch_size;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sweep.update_all(batch_size).await {
                            Ok(report) => debug!(
                                changed = report.changed,
                                failed = report.failed,
                                "decay sweep finished"
                            ),
                            Err(err) => warn!(error = %err, "decay sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("decay loop stopped");
        })
    }

    fn spawn_consolidation_loop(
        &self,
        tier: ConsolidationTier,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let consolidator = Arc::clone(&self.consolidator);
        let interval_secs = self.config.consolidation.cycle_seconds(tier);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // One tier failing must not block the others; log
                        // and let the next cycle retry the window.
                        match consolidator.run_current(tier, Utc::now()).await {
                            Ok(report) => debug!(
                                tier = %tier,
                                bucket = %report.bucket,
                                inputs = report.input_count,
                                "consolidation cycle finished"
                            ),
                            Err(err) => warn!(tier = %tier, error = %err, "consolidation failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(tier = %tier, "consolidation loop stopped");
        })
    }

    fn spawn_gc_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let history = Arc::clone(&self.history);
        let interval_secs = self.config.history.gc_interval_seconds;
        let keep = self.config.history.keep_latest_versions;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = history.garbage_collect(keep);
                        if removed > 0 {
                            debug!(removed, "history gc finished");
                        }
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("history gc loop stopped");
        })
    }

    /// Watches the change stream and snapshots records whose tracked fields
    /// meaningfully changed. Retention-score-only churn from the decay
    /// sweep does not grow history.
    fn spawn_snapshotter(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let history = Arc::clone(&self.history);
        let mut events = self.store.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            if event.action != ChangeAction::Upsert {
                                continue;
                            }
                            let Some(record) = store.get(event.kind, &event.id) else {
                                continue;
                            };
                            let should_save = match history.get_version(&record.id, None) {
                                None => true,
                                Some(previous) => {
                                    history::is_meaningful_change(&previous, &record)
                                }
                            };
                            if should_save {
                                match history.save_version(&record, "change", "engine") {
                                    Ok(version_id) => {
                                        // Reflect the new snapshot in the
                                        // live record's version chain. The
                                        // chain is not a tracked diff field,
                                        // so this write does not snapshot
                                        // again.
                                        let outcome = store
                                            .update(event.kind, &event.id, move |mut next| {
                                                if !next.version_chain.contains(&version_id) {
                                                    next.version_chain.push(version_id);
                                                }
                                                next
                                            })
                                            .await;
                                        if let Err(err) = outcome {
                                            if !matches!(err, EngramError::NotFound(_)) {
                                                warn!(id = %record.id, error = %err,
                                                    "failed to record version chain entry");
                                            }
                                        }
                                    }
                                    Err(err) => {
                                        warn!(id = %record.id, error = %err,
                                            "failed to snapshot record");
                                    }
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "snapshotter lagged behind change stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("snapshotter stopped");
        })
    }
}
