use crate::flight::Flight;
use crate::listener::{CacheListener, EvictionReason};
use crate::metrics::Metrics;
use crate::store::ShardedStore;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// The internal, thread-safe core of the keyed store.
pub(crate) struct MapShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  /// The in-flight registry for `get_or_add`, sharded like the store.
  /// A key is present here only while a factory is running for it.
  pub(crate) flights: Box<[Mutex<HashMap<K, Arc<Flight<V>>, H>>]>,
  pub(crate) default_ttl: Duration,
  pub(crate) listeners: Box<[Arc<dyn CacheListener<V>>]>,
  pub(crate) metrics: Arc<Metrics>,
}

impl<K, V, H> fmt::Debug for MapShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapShared")
      .field("default_ttl", &self.default_ttl)
      .field("shards", &self.store.shards.len())
      .field("listeners", &self.listeners.len())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> MapShared<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  #[inline]
  pub(crate) fn flight_shard<Q>(&self, key: &Q) -> &Mutex<HashMap<K, Arc<Flight<V>>, H>>
  where
    Q: Hash + ?Sized,
  {
    &self.flights[self.store.shard_index(key)]
  }

  #[inline]
  pub(crate) fn ttl_or_default(&self, ttl: Option<Duration>) -> Duration {
    ttl.unwrap_or(self.default_ttl)
  }

  /// Never call while holding a shard or registry lock.
  pub(crate) fn notify_add(&self, value: &V) {
    for listener in self.listeners.iter() {
      listener.on_add(value);
    }
  }

  /// Never call while holding a shard or registry lock.
  pub(crate) fn notify_remove(&self, value: &V, reason: EvictionReason) {
    for listener in self.listeners.iter() {
      listener.on_remove(value, reason);
    }
  }
}
