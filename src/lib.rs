//! Concurrent, in-process time-to-live caching primitives.
//!
//! Values are stored together with an expiration instant and become
//! unavailable once that instant passes. Expiry is enforced lazily when an
//! entry is accessed and in bulk by a background sweep.
//!
//! # Features
//! - **Keyed store**: [`TtlMap`] — a sharded concurrent map with lazy expiry,
//!   silent in-place renewal, and single-flight `get_or_add` in both blocking
//!   and `async` flavors.
//! - **Single slot**: [`TtlCell`] — the same contract specialized to exactly
//!   one value, with an explicit `renew`.
//! - **Ordered list**: [`TtlList`] — position-indexed TTL semantics behind
//!   one coarse lock, for callers that want list shape instead of key lookup.
//! - **Background sweeping**: [`Sweeper`] — drives `remove_expired` across
//!   any set of registered stores on a runtime-adjustable interval, with
//!   deterministic start/stop.
//! - **Notifications**: [`CacheListener`] observers fire after entries become
//!   live or are evicted, always outside the stores' internal locks.
//! - **Non-Clone support**: values live in an `Arc<V>`, so reads never
//!   require `V: Clone`.
//! - **Observability**: atomics-based metrics snapshots.

// Public modules that form the API
pub mod builder;
pub mod cell;
pub mod error;
pub mod iter;
pub mod list;
pub mod listener;
pub mod map;
pub mod metrics;
pub mod sweeper;

// Internal, crate-only modules
mod entry;
mod flight;
mod shared;
mod store;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::TtlMapBuilder;
pub use cell::TtlCell;
pub use error::{BuildError, CacheError, FactoryError};
pub use list::TtlList;
pub use listener::{CacheListener, EvictionReason};
pub use map::TtlMap;
pub use metrics::MetricsSnapshot;
pub use sweeper::{Sweepable, Sweeper, SweeperMetrics};
