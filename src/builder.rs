use crate::error::BuildError;
use crate::listener::{AddFn, CacheListener, EvictionReason, RemoveFn};
use crate::map::TtlMap;
use crate::metrics::Metrics;
use crate::shared::MapShared;
use crate::store::ShardedStore;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// The default TTL applied when a store is built without one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

fn default_shards() -> usize {
  (num_cpus::get() * 4).next_power_of_two()
}

/// A builder for creating [`TtlMap`] instances.
pub struct TtlMapBuilder<K, V, H = ahash::RandomState> {
  default_ttl: Duration,
  shards: usize,
  hasher: H,
  listeners: Vec<Arc<dyn CacheListener<V>>>,
  _key_marker: PhantomData<K>,
}

impl<K, V, H> fmt::Debug for TtlMapBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TtlMapBuilder")
      .field("default_ttl", &self.default_ttl)
      .field("shards", &self.shards)
      .field("listeners", &self.listeners.len())
      .finish_non_exhaustive()
  }
}

impl<K, V> TtlMapBuilder<K, V> {
  pub fn new() -> Self {
    Self {
      default_ttl: DEFAULT_TTL,
      shards: default_shards(),
      hasher: ahash::RandomState::new(),
      listeners: Vec::new(),
      _key_marker: PhantomData,
    }
  }
}

impl<K, V> Default for TtlMapBuilder<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H> TtlMapBuilder<K, V, H> {
  /// Sets the TTL used when an operation is called without an explicit one.
  pub fn default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Sets the number of concurrent shards. Rounded up to a power of two at
  /// build time; zero is a build error.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards;
    self
  }

  /// Replaces the default `ahash` hasher. This is also the key-comparison
  /// override: keys are compared by the `Eq` impl of `K` and hashed by the
  /// given `BuildHasher`.
  pub fn hasher<H2>(self, hasher: H2) -> TtlMapBuilder<K, V, H2> {
    TtlMapBuilder {
      default_ttl: self.default_ttl,
      shards: self.shards,
      hasher,
      listeners: self.listeners,
      _key_marker: PhantomData,
    }
  }

  /// Registers a lifecycle listener. Listeners run in registration order.
  pub fn listener<L>(mut self, listener: L) -> Self
  where
    L: CacheListener<V> + 'static,
  {
    self.listeners.push(Arc::new(listener));
    self
  }

  /// Registers a closure called after every entry becomes live.
  pub fn on_add<F>(self, f: F) -> Self
  where
    F: Fn(&V) + Send + Sync + 'static,
  {
    self.listener(AddFn(f))
  }

  /// Registers a closure called after every eviction.
  pub fn on_evict<F>(self, f: F) -> Self
  where
    F: Fn(&V, EvictionReason) + Send + Sync + 'static,
  {
    self.listener(RemoveFn(f))
  }

  pub fn build(self) -> Result<TtlMap<K, V, H>, BuildError>
  where
    K: Eq + Hash,
    H: BuildHasher + Clone,
  {
    if self.default_ttl.is_zero() {
      return Err(BuildError::ZeroDefaultTtl);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    let num_shards = self.shards.next_power_of_two();

    let store = ShardedStore::new(num_shards, self.hasher.clone());
    let flights = (0..num_shards)
      .map(|_| Mutex::new(HashMap::with_hasher(self.hasher.clone())))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Ok(TtlMap {
      shared: Arc::new(MapShared {
        store,
        flights,
        default_ttl: self.default_ttl,
        listeners: self.listeners.into_boxed_slice(),
        metrics: Arc::new(Metrics::new()),
      }),
    })
  }
}
