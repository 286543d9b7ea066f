//! Read-side access: fetch-through queries and key observers.
//!
//! A [`QueryClient`] pairs a [`CacheStore`] with a [`Fetcher`] (the opaque
//! remote GET). Reads return the cached snapshot when it is fresh and fetch
//! otherwise; observers yield a refreshed snapshot after every invalidation
//! of their key, which is how push notifications reach dependent views.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::TransportError;
use crate::key::EntityKey;
use crate::store::{CacheStore, Snapshot, StoreEvent, StoreEventKind};

/// Opaque remote read. Implementations map keys to REST endpoints.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &EntityKey) -> Result<Snapshot, TransportError>;
}

/// Cache-backed query client handed to views and the connection supervisor.
#[derive(Clone)]
pub struct QueryClient {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl QueryClient {
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Return the cached snapshot if present and fresh, otherwise fetch.
    pub async fn get_or_fetch(&self, key: &EntityKey) -> Result<Snapshot, TransportError> {
        if let Some(slot) = self.store.get(key)
            && !slot.stale
            && let Some(snapshot) = slot.snapshot
        {
            return Ok(snapshot);
        }
        self.refetch(key).await
    }

    /// Unconditionally fetch and write through, guarded by the slot epoch.
    /// If the fetch was superseded mid-flight, the store keeps the newer
    /// value but the caller still receives the fetched snapshot.
    pub async fn refetch(&self, key: &EntityKey) -> Result<Snapshot, TransportError> {
        let epoch = self.store.begin_fetch(key);
        match self.fetcher.fetch(key).await {
            Ok(snapshot) => {
                let applied = self.store.complete_fetch(key, epoch, Ok(snapshot.clone()));
                if !applied {
                    debug!(key = %key, "refetch superseded; result not stored");
                }
                Ok(snapshot)
            }
            Err(err) => {
                self.store.complete_fetch(key, epoch, Err(&err));
                Err(err)
            }
        }
    }

    /// Observe one key: each invalidation or update produces a fresh value.
    pub fn observe(&self, key: EntityKey) -> QueryObserver {
        QueryObserver {
            key,
            rx: self.store.subscribe(),
            client: self.clone(),
        }
    }
}

/// Live view over one key. [`QueryObserver::next`] resolves after the next
/// change to the key, refetching when the change was an invalidation.
pub struct QueryObserver {
    key: EntityKey,
    rx: broadcast::Receiver<StoreEvent>,
    client: QueryClient,
}

impl QueryObserver {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Wait for the next change to the observed key. Returns `None` when the
    /// store has been dropped.
    pub async fn next(&mut self) -> Option<Result<Snapshot, TransportError>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key == self.key => match event.kind {
                    StoreEventKind::Invalidated => {
                        return Some(self.client.refetch(&self.key).await);
                    }
                    StoreEventKind::Updated => {
                        if let Some(snapshot) = self.client.store.snapshot(&self.key) {
                            return Some(Ok(snapshot));
                        }
                        // Updated event raced with a removal; keep waiting.
                    }
                    StoreEventKind::Removed => continue,
                },
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Freshness beats completeness; fold missed events into one refetch.
                    debug!(key = %self.key, missed, "observer lagged; refetching");
                    return Some(self.client.refetch(&self.key).await);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
