//! Keyed record storage
//!
//! `RecordStore` is the single shared mutable resource in the engine: a
//! typed, keyed store with per-record locking, a time-sorted index per kind,
//! and best-effort change notifications. Writes to the same id are totally
//! ordered by lock acquisition; writes to distinct ids never block each
//! other. Reads take no lock and always see the latest committed value.

pub mod events;

pub use events::{ChangeAction, ChangeEvent};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::config::StoreConfig;
use crate::error::{EngramError, Result};
use crate::record::{MemoryRecord, RecordKind};

type RecordKey = (RecordKind, String);
type TimeIndex = HashMap<RecordKind, BTreeMap<(DateTime<Utc>, String), String>>;

/// Keyed, typed storage primitive with per-id locking and change fan-out.
pub struct RecordStore {
    records: DashMap<RecordKey, MemoryRecord>,
    locks: DashMap<RecordKey, Arc<Mutex<()>>>,
    time_index: RwLock<TimeIndex>,
    events: broadcast::Sender<ChangeEvent>,
    lock_timeout: Duration,
}

impl RecordStore {
    /// Create a store from configuration
    pub fn new(config: &StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            records: DashMap::new(),
            locks: DashMap::new(),
            time_index: RwLock::new(HashMap::new()),
            events,
            lock_timeout: Duration::from_secs(config.lock_timeout_seconds),
        }
    }

    /// Subscribe to change notifications.
    ///
    /// Events are delivered at-most-once per subscriber; a subscriber that
    /// falls behind the channel capacity drops the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Subscribe as a `Stream`, silently skipping lagged gaps. Useful for
    /// consumers that only care about a live tail of changes.
    pub fn change_stream(&self) -> impl Stream<Item = ChangeEvent> {
        BroadcastStream::new(self.subscribe()).filter_map(|result| async move { result.ok() })
    }

    /// Atomically read-modify-write one record.
    ///
    /// Acquires the per-id lock (bounded wait, `LockTimeout` on expiry),
    /// applies `mutator` to the current value (`None` if absent), persists
    /// the result, refreshes the time index, and emits one change event.
    /// The mutator must be pure; it is never retried automatically.
    ///
    /// `id`, `kind`, and `created_at` are pinned by the store: whatever the
    /// mutator returns, the persisted record keeps the key it was addressed
    /// by and its original creation time. The version counter strictly
    /// increases on every persisted mutation.
    pub async fn upsert<F>(&self, kind: RecordKind, id: &str, mutator: F) -> Result<u64>
    where
        F: FnOnce(Option<MemoryRecord>) -> MemoryRecord,
    {
        let key = (kind, id.to_string());
        let lock = self.lock_for(&key);

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock())
            .await
            .map_err(|_| EngramError::LockTimeout {
                kind: kind.to_string(),
                id: id.to_string(),
                waited_ms: self.lock_timeout.as_millis() as u64,
            })?;

        let current = self.records.get(&key).map(|r| r.value().clone());
        let prior = current
            .as_ref()
            .map(|r| (r.version, r.created_at));

        let mut next = mutator(current);
        next.id = id.to_string();
        next.kind = kind;
        if let Some((version, created_at)) = prior {
            next.version = version + 1;
            next.created_at = created_at;
        } else {
            next.version = 1;
        }

        let created_at = next.created_at;
        let new_version = next.version;
        self.records.insert(key.clone(), next);

        {
            let mut index = self.time_index.write().await;
            let by_kind = index.entry(kind).or_default();
            if let Some((_, old_created)) = prior {
                if old_created != created_at {
                    by_kind.remove(&(old_created, id.to_string()));
                }
            }
            by_kind.insert((created_at, id.to_string()), id.to_string());
        }

        drop(guard);

        trace!(kind = %kind, id, version = new_version, "record upserted");
        self.publish(ChangeEvent::now(kind, id, ChangeAction::Upsert));
        Ok(new_version)
    }

    /// Atomically read-modify-write an existing record.
    ///
    /// Same locking and pinning rules as [`RecordStore::upsert`], except
    /// that when no record is present under the lock nothing is persisted
    /// and `NotFound` is returned. Writers racing a delete use this so a
    /// removed record is never resurrected as an empty shell.
    pub async fn update<F>(&self, kind: RecordKind, id: &str, mutator: F) -> Result<u64>
    where
        F: FnOnce(MemoryRecord) -> MemoryRecord,
    {
        let key = (kind, id.to_string());
        let lock = self.lock_for(&key);

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock())
            .await
            .map_err(|_| EngramError::LockTimeout {
                kind: kind.to_string(),
                id: id.to_string(),
                waited_ms: self.lock_timeout.as_millis() as u64,
            })?;

        let Some(current) = self.records.get(&key).map(|r| r.value().clone()) else {
            drop(guard);
            return Err(EngramError::NotFound(format!("{kind}/{id}")));
        };
        let prior_version = current.version;
        let prior_created = current.created_at;

        let mut next = mutator(current);
        next.id = id.to_string();
        next.kind = kind;
        next.version = prior_version + 1;
        // Creation time is pinned, so the time-index entry stays valid.
        next.created_at = prior_created;

        let new_version = next.version;
        self.records.insert(key, next);

        drop(guard);

        trace!(kind = %kind, id, version = new_version, "record updated");
        self.publish(ChangeEvent::now(kind, id, ChangeAction::Upsert));
        Ok(new_version)
    }

    /// Return the latest persisted value, if any. Takes no lock.
    pub fn get(&self, kind: RecordKind, id: &str) -> Option<MemoryRecord> {
        self.records
            .get(&(kind, id.to_string()))
            .map(|r| r.value().clone())
    }

    /// Inclusive range scan over the time index for one kind, ordered by
    /// creation time ascending.
    pub async fn range_by_time(
        &self,
        kind: RecordKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MemoryRecord> {
        let index = self.time_index.read().await;
        let Some(by_kind) = index.get(&kind) else {
            return Vec::new();
        };

        by_kind
            .range((start, String::new())..)
            .take_while(|((ts, _), _)| *ts <= end)
            .filter_map(|(_, id)| self.get(kind, id))
            .collect()
    }

    /// Remove a record from the primary map and all indices atomically.
    ///
    /// Returns `true` when a record was present and removed.
    pub async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool> {
        let key = (kind, id.to_string());
        let lock = self.lock_for(&key);

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock())
            .await
            .map_err(|_| EngramError::LockTimeout {
                kind: kind.to_string(),
                id: id.to_string(),
                waited_ms: self.lock_timeout.as_millis() as u64,
            })?;

        let removed = self.records.remove(&key);
        let Some((_, record)) = removed else {
            drop(guard);
            return Ok(false);
        };

        {
            let mut index = self.time_index.write().await;
            if let Some(by_kind) = index.get_mut(&kind) {
                by_kind.remove(&(record.created_at, id.to_string()));
            }
        }

        // Keep the lock table bounded by live contention: the entry is only
        // dropped when no other writer holds a clone of this lock.
        self.locks
            .remove_if(&key, |_, entry| Arc::strong_count(entry) <= 2);

        drop(guard);

        trace!(kind = %kind, id, "record deleted");
        self.publish(ChangeEvent::now(kind, id, ChangeAction::Delete));
        Ok(true)
    }

    /// All records of one kind, in unspecified order
    pub fn list_by_kind(&self, kind: RecordKind) -> Vec<MemoryRecord> {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All records in the store, in unspecified order
    pub fn list_all(&self) -> Vec<MemoryRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of records of one kind
    pub fn count(&self, kind: RecordKind) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .count()
    }

    fn lock_for(&self, key: &RecordKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine; fan-out is best-effort.
        let _ = self.events.send(event);
    }
}
