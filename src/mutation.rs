//! Optimistic mutation engine.
//!
//! A mutation executes a remote write, immediately applies a locally computed
//! speculative snapshot to the cache store, and reconciles when the remote
//! call settles: commit (merge or invalidate-and-refetch) on success, exact
//! rollback to the pre-mutation snapshot on failure.
//!
//! Concurrent mutations on the same key are deliberately not serialized: each
//! invocation captures its own pre-mutation snapshot and each rollback
//! restores its own capture. A second in-flight mutation's rollback can
//! therefore overwrite the first one's optimistic value (see DESIGN.md before
//! changing this).

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::errors::TransportError;
use crate::key::EntityKey;
use crate::notify::{Breadcrumb, BreadcrumbSink, Notifier, TracingBreadcrumbs, TracingNotifier};
use crate::store::{CacheStore, Snapshot};

/// Remote write: variables in, server result out.
pub type MutationFn =
    Arc<dyn Fn(Snapshot) -> BoxFuture<'static, Result<Snapshot, TransportError>> + Send + Sync>;

/// Pure speculative update. Must tolerate an absent current snapshot and must
/// not perform I/O.
pub type ComputeOptimisticFn =
    Arc<dyn Fn(Option<&Snapshot>, &Snapshot) -> Snapshot + Send + Sync>;

/// Local merge of the server result into the cache, applied on success
/// instead of a refetch.
pub type ReconcileFn =
    Arc<dyn Fn(Option<&Snapshot>, &Snapshot, &Snapshot) -> Snapshot + Send + Sync>;

/// How a successful mutation commits to the cache. An explicit branch, not an
/// optional callback: `Refetch` invalidates the key so observers pull fresh
/// server state, `Merge` writes a locally computed final snapshot.
#[derive(Clone)]
pub enum Reconcile {
    Refetch,
    Merge(ReconcileFn),
}

impl std::fmt::Debug for Reconcile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reconcile::Refetch => write!(f, "Reconcile::Refetch"),
            Reconcile::Merge(_) => write!(f, "Reconcile::Merge(..)"),
        }
    }
}

/// Validated mutation configuration.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// Key to speculate on.
    pub key: EntityKey,
    /// Additional keys invalidated on success (e.g. the list view embedding
    /// this entity).
    pub invalidates: Vec<EntityKey>,
    pub reconcile: Reconcile,
    /// Successful mutations slower than this emit a diagnostic breadcrumb.
    /// Observability only; the operation is never aborted.
    pub slow_threshold: Duration,
    /// User-action label carried into toasts, logs, and breadcrumbs.
    pub label: String,
}

impl MutationConfig {
    pub fn new(key: EntityKey, label: impl Into<String>) -> Self {
        Self {
            key,
            invalidates: Vec::new(),
            reconcile: Reconcile::Refetch,
            slow_threshold: Duration::from_millis(1000),
            label: label.into(),
        }
    }

    /// Like [`MutationConfig::new`], but with tunables seeded from the sync
    /// configuration instead of the built-in defaults.
    pub fn from_config(key: EntityKey, label: impl Into<String>, sync: &SyncConfig) -> Self {
        Self::new(key, label).slow_threshold(sync.slow_mutation_threshold())
    }

    pub fn invalidates(mut self, keys: Vec<EntityKey>) -> Self {
        self.invalidates = keys;
        self
    }

    pub fn reconcile(mut self, reconcile: Reconcile) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

/// Settlement state, observable while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

/// Per-run rollback capture. Owned by exactly one invocation and dropped when
/// it settles.
struct OptimisticContext {
    snapshot: Option<Snapshot>,
    started: Instant,
}

/// An optimistic mutation bound to a store, a remote call, and a speculative
/// update function. `run` may be invoked repeatedly with different variables.
pub struct OptimisticMutation {
    store: Arc<CacheStore>,
    config: MutationConfig,
    mutation_fn: MutationFn,
    compute_optimistic: ComputeOptimisticFn,
    notifier: Arc<dyn Notifier>,
    breadcrumbs: Arc<dyn BreadcrumbSink>,
    state_tx: watch::Sender<MutationState>,
}

impl OptimisticMutation {
    pub fn new(
        store: Arc<CacheStore>,
        config: MutationConfig,
        mutation_fn: MutationFn,
        compute_optimistic: ComputeOptimisticFn,
    ) -> Self {
        let (state_tx, _) = watch::channel(MutationState::Idle);
        Self {
            store,
            config,
            mutation_fn,
            compute_optimistic,
            notifier: Arc::new(TracingNotifier),
            breadcrumbs: Arc::new(TracingBreadcrumbs),
            state_tx,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_breadcrumbs(mut self, breadcrumbs: Arc<dyn BreadcrumbSink>) -> Self {
        self.breadcrumbs = breadcrumbs;
        self
    }

    /// Watch the settlement state (`isPending`/`isSuccess`/`isError` surface).
    pub fn state(&self) -> watch::Receiver<MutationState> {
        self.state_tx.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        *self.state_tx.borrow() == MutationState::Pending
    }

    /// Execute the mutation.
    ///
    /// The speculative write lands in the store before the remote call is
    /// awaited, so observers see the change with no perceived latency. On
    /// failure the key is restored to the exact pre-mutation snapshot
    /// (absent restores absent) and the error is returned after the toast.
    pub async fn run(&self, variables: Snapshot) -> Result<Snapshot, TransportError> {
        let key = &self.config.key;
        self.breadcrumbs.record(Breadcrumb::new(
            "mutation",
            format!("{}: started ({key})", self.config.label),
        ));

        // A slow GET finishing after our speculative write would clobber it.
        self.store.cancel_in_flight(key);

        let ctx = OptimisticContext {
            snapshot: self.store.snapshot(key),
            started: Instant::now(),
        };

        let speculative = (self.compute_optimistic)(ctx.snapshot.as_ref(), &variables);
        self.store.set(key, speculative);
        let _ = self.state_tx.send(MutationState::Pending);

        match (self.mutation_fn)(variables.clone()).await {
            Ok(result) => {
                let elapsed = ctx.started.elapsed();
                if elapsed > self.config.slow_threshold {
                    warn!(
                        label = %self.config.label,
                        key = %key,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "slow mutation"
                    );
                    self.breadcrumbs.record(Breadcrumb::new(
                        "mutation",
                        format!(
                            "{}: slow ({} ms)",
                            self.config.label,
                            elapsed.as_millis()
                        ),
                    ));
                }

                match &self.config.reconcile {
                    Reconcile::Merge(merge) => {
                        let current = self.store.snapshot(key);
                        let merged = merge(current.as_ref(), &result, &variables);
                        self.store.set(key, merged);
                    }
                    Reconcile::Refetch => self.store.invalidate(key),
                }
                for extra in &self.config.invalidates {
                    self.store.invalidate(extra);
                }

                debug!(label = %self.config.label, key = %key, "mutation committed");
                self.breadcrumbs.record(Breadcrumb::new(
                    "mutation",
                    format!("{}: committed", self.config.label),
                ));
                self.notifier.success(&self.config.label, "Saved");
                let _ = self.state_tx.send(MutationState::Success);
                Ok(result)
            }
            Err(err) => {
                // Full rollback, never a partial merge.
                match ctx.snapshot {
                    Some(snapshot) => self.store.set(key, snapshot),
                    None => self.store.remove(key),
                }
                warn!(label = %self.config.label, key = %key, error = %err, "mutation rolled back");
                self.breadcrumbs.record(Breadcrumb::new(
                    "mutation",
                    format!("{}: rolled back ({err})", self.config.label),
                ));
                self.notifier.error(&self.config.label, &err.to_string());
                let _ = self.state_tx.send(MutationState::Error);
                Err(err)
            }
        }
    }
}
