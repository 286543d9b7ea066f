//! In-memory cache of entity snapshots, keyed by [`EntityKey`].
//!
//! The store is an explicitly constructed instance, not a process-wide
//! singleton: callers create one at startup and pass it down as
//! `Arc<CacheStore>`, so tests can run isolated stores.
//!
//! Writes notify observers over a broadcast channel. Fetch completions are
//! guarded by a per-slot epoch so that a stale in-flight GET, cancelled just
//! before an optimistic write, can never clobber the speculative value.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::errors::TransportError;
use crate::key::EntityKey;

/// A point-in-time server snapshot of one entity.
pub type Snapshot = Value;

/// Cached state for one entity key.
///
/// Absent from the map means "not yet loaded" — distinct from a slot whose
/// snapshot happens to be empty JSON.
#[derive(Debug, Clone, Default)]
pub struct CacheSlot {
    pub snapshot: Option<Snapshot>,
    /// A fetch for this key is in flight.
    pub fetching: bool,
    /// The snapshot is known out of date; observers should refetch.
    pub stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
    /// Message from the last failed fetch, if any.
    pub error: Option<String>,
    /// Reassigned on every `begin_fetch`/`cancel_in_flight` from a
    /// store-global counter; completions carrying any other epoch are
    /// dropped. Global issuance keeps epochs unique across slot removal,
    /// so a slot recreated after rollback-to-absent can never hand out an
    /// epoch some in-flight fetch already holds.
    epoch: u64,
}

/// What happened to a slot, for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// A new snapshot was written.
    Updated,
    /// The slot was marked stale; a refetch is expected.
    Invalidated,
    /// The slot was removed (key is absent again).
    Removed,
}

/// Change notification delivered to store subscribers.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub key: EntityKey,
    pub kind: StoreEventKind,
}

/// Key-indexed store of entity snapshots. Slots are created on first touch
/// and never implicitly evicted.
pub struct CacheStore {
    slots: DashMap<EntityKey, CacheSlot>,
    events_tx: broadcast::Sender<StoreEvent>,
    /// Source of fetch epochs for every slot. Starts at 1 so the default
    /// slot epoch of 0 never matches an issued one.
    epoch_counter: AtomicU64,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            slots: DashMap::new(),
            events_tx,
            epoch_counter: AtomicU64::new(0),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epoch_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Snapshot of the slot for `key`. `None` means never loaded.
    pub fn get(&self, key: &EntityKey) -> Option<CacheSlot> {
        self.slots.get(key).map(|s| s.value().clone())
    }

    /// Convenience accessor for the snapshot itself.
    pub fn snapshot(&self, key: &EntityKey) -> Option<Snapshot> {
        self.slots.get(key).and_then(|s| s.value().snapshot.clone())
    }

    /// Write a snapshot, clearing stale/error state, and notify observers.
    pub fn set(&self, key: &EntityKey, snapshot: Snapshot) {
        {
            let mut slot = self.slots.entry(key.clone()).or_default();
            slot.snapshot = Some(snapshot);
            slot.stale = false;
            slot.error = None;
            slot.updated_at = Some(Utc::now());
        }
        trace!(key = %key, "store: snapshot written");
        self.notify(key, StoreEventKind::Updated);
    }

    /// Mark a slot stale. Creates the slot if it does not exist yet so that
    /// observers of a never-fetched key still see the invalidation.
    pub fn invalidate(&self, key: &EntityKey) {
        {
            let mut slot = self.slots.entry(key.clone()).or_default();
            slot.stale = true;
        }
        trace!(key = %key, "store: invalidated");
        self.notify(key, StoreEventKind::Invalidated);
    }

    /// Remove the slot entirely, restoring "absent". Used by mutation rollback
    /// when the pre-mutation state was never-fetched.
    pub fn remove(&self, key: &EntityKey) {
        if self.slots.remove(key).is_some() {
            trace!(key = %key, "store: removed");
            self.notify(key, StoreEventKind::Removed);
        }
    }

    /// Invalidate any in-flight fetch for `key` without touching its data.
    /// A fetch begun before this call will have its completion dropped.
    pub fn cancel_in_flight(&self, key: &EntityKey) {
        let epoch = self.next_epoch();
        let mut slot = self.slots.entry(key.clone()).or_default();
        slot.epoch = epoch;
        slot.fetching = false;
    }

    /// Register a fetch and return the epoch that must accompany its
    /// completion. Any previously in-flight fetch for this key is superseded.
    pub fn begin_fetch(&self, key: &EntityKey) -> u64 {
        let epoch = self.next_epoch();
        let mut slot = self.slots.entry(key.clone()).or_default();
        slot.epoch = epoch;
        slot.fetching = true;
        epoch
    }

    /// Apply a fetch result if `epoch` is still current. Returns whether the
    /// result was applied; superseded completions are dropped silently.
    pub fn complete_fetch(
        &self,
        key: &EntityKey,
        epoch: u64,
        result: Result<Snapshot, &TransportError>,
    ) -> bool {
        let applied = {
            let mut slot = self.slots.entry(key.clone()).or_default();
            if slot.epoch != epoch {
                trace!(key = %key, epoch, current = slot.epoch, "store: stale fetch dropped");
                return false;
            }
            slot.fetching = false;
            match result {
                Ok(snapshot) => {
                    slot.snapshot = Some(snapshot);
                    slot.stale = false;
                    slot.error = None;
                    slot.updated_at = Some(Utc::now());
                    true
                }
                Err(err) => {
                    slot.error = Some(err.to_string());
                    false
                }
            }
        };
        if applied {
            self.notify(key, StoreEventKind::Updated);
        }
        applied
    }

    /// Subscribe to slot change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn notify(&self, key: &EntityKey, kind: StoreEventKind) {
        // No subscribers is fine; background writes happen before any view mounts.
        let _ = self.events_tx.send(StoreEvent {
            key: key.clone(),
            kind,
        });
    }
}
