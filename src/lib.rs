//! Client-side sync core for live project data.
//!
//! Three cooperating layers keep a local view of server-owned project state
//! fresh:
//!
//! - a snapshot cache with invalidation events ([`store`], [`query`])
//! - optimistic mutations that patch the cache before the server confirms,
//!   with exact rollback on failure ([`mutation`])
//! - a supervised realtime channel per project that invalidates on pushes
//!   and degrades to polling when the socket cannot be kept up ([`realtime`])
//!
//! [`progress`] derives phase completion purely from cached snapshots, so a
//! progress view never needs its own requests.

pub mod config;
pub mod errors;
pub mod key;
pub mod mutation;
pub mod notify;
pub mod progress;
pub mod query;
pub mod realtime;
pub mod rest;
pub mod store;
pub mod ui;

pub use errors::{ChannelError, TransportError};
pub use key::{EntityKey, EntityKind};
pub use mutation::{MutationConfig, MutationState, OptimisticMutation, Reconcile};
pub use query::{Fetcher, QueryClient, QueryObserver};
pub use realtime::{ConnectionState, ConnectionSupervisor, ProjectSubscription};
pub use store::{CacheSlot, CacheStore, Snapshot, StoreEvent, StoreEventKind};
