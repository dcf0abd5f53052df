use crate::builder::TtlMapBuilder;
use crate::entry::CacheEntry;
use crate::error::{CacheError, FactoryAborted, FactoryError};
use crate::flight::{Flight, FlightAttempt};
use crate::iter::{Iter, Keys, Values};
use crate::listener::EvictionReason;
use crate::metrics::MetricsSnapshot;
use crate::shared::MapShared;

use std::borrow::Borrow;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe keyed store whose entries expire after a time-to-live.
///
/// Expiry is enforced lazily on access and in bulk by
/// [`remove_expired`](TtlMap::remove_expired), which a
/// [`Sweeper`](crate::sweeper::Sweeper) can drive periodically.
/// Reads return `Arc<V>`, so values never need to be `Clone`.
///
/// The handle is cheap to clone; clones operate on the same store.
pub struct TtlMap<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<MapShared<K, V, H>>,
}

impl<K, V, H> Clone for TtlMap<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for TtlMap<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TtlMap")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K, V> TtlMap<K, V> {
  pub fn builder() -> TtlMapBuilder<K, V> {
    TtlMapBuilder::new()
  }
}

impl<K, V, H> TtlMap<K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  pub fn default_ttl(&self) -> Duration {
    self.shared.default_ttl
  }

  /// Unconditionally installs a new entry expiring `ttl` from now (`None`
  /// uses the store default). A live entry already present for the key is
  /// evicted first, notifying `on_remove` with [`EvictionReason::Replaced`]
  /// before the new entry's `on_add`; a stale occupant is reported with
  /// [`EvictionReason::Expired`] instead.
  pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
    let ttl = self.shared.ttl_or_default(ttl);
    self.install(key, Arc::new(value), ttl);
  }

  /// If a live entry exists for the key, updates its value and expiry in
  /// place **without any notification**. Otherwise behaves like [`insert`].
  ///
  /// The silent path is deliberate: a renewal is not a removal plus an
  /// insertion as far as listeners are concerned. Note that renewing always
  /// overwrites the stored value with the new argument, not just the expiry.
  ///
  /// [`insert`]: TtlMap::insert
  pub fn add_or_renew(&self, key: K, value: V, ttl: Option<Duration>) {
    let ttl = self.shared.ttl_or_default(ttl);
    let mut pending = Some(value);
    {
      let mut guard = self.shared.store.shard_for(&key).write();
      if let Some(entry) = guard.get_mut(&key) {
        if !entry.is_expired() {
          if let Some(value) = pending.take() {
            entry.replace_value(value);
            entry.renew(ttl);
          }
        }
      }
    }
    match pending {
      // Renewed in place; no listener fires.
      None => {
        self.shared.metrics.renewals.fetch_add(1, Ordering::Relaxed);
      }
      Some(value) => self.install(key, Arc::new(value), ttl),
    }
  }

  /// Returns the live value for the key, if any. An expired entry found on
  /// the way is evicted (notifying `on_remove`) and reported as absent.
  pub fn try_get<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let shard = self.shared.store.shard_for(key);

    // Fast path: a read lock is enough for a live hit or a clean miss.
    {
      let guard = shard.read();
      match guard.get(key) {
        Some(entry) if !entry.is_expired() => {
          let value = entry.value();
          drop(guard);
          self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
          return Some(value);
        }
        Some(_) => {} // Expired; fall through to evict under the write lock.
        None => {
          drop(guard);
          self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
          return None;
        }
      }
    }

    // The entry looked expired. Re-check under the write lock, since a
    // racing insert may have replaced it with a live one.
    let mut fresh_hit = None;
    let mut victim = None;
    {
      let mut guard = shard.write();
      match guard.get(key) {
        Some(entry) if entry.is_expired() => {
          victim = guard.remove(key).map(|entry| entry.value());
        }
        Some(entry) => fresh_hit = Some(entry.value()),
        None => {}
      }
    }

    if let Some(old) = &victim {
      self
        .shared
        .metrics
        .evicted_by_ttl
        .fetch_add(1, Ordering::Relaxed);
      self.shared.notify_remove(old, EvictionReason::Expired);
    }
    if let Some(value) = fresh_hit {
      self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
      return Some(value);
    }
    self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
    None
  }

  /// Returns the live value for the key, or [`CacheError::KeyNotFound`] if
  /// the key is absent or expired. Same lazy-eviction side effect as
  /// [`try_get`](TtlMap::try_get).
  pub fn get<Q>(&self, key: &Q) -> Result<Arc<V>, CacheError>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.try_get(key).ok_or(CacheError::KeyNotFound)
  }

  /// Equivalent to [`try_get`](TtlMap::try_get) discarding the value,
  /// including the lazy-eviction side effect.
  pub fn contains_key<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.try_get(key).is_some()
  }

  /// Reads the live value for the key without evicting an expired occupant
  /// and without touching metrics.
  pub fn peek<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let guard = self.shared.store.shard_for(key).read();
    match guard.get(key) {
      Some(entry) if !entry.is_expired() => Some(entry.value()),
      _ => None,
    }
  }

  /// Returns the live value for the key, or computes it with `factory`.
  ///
  /// Concurrent callers for the same key are collapsed into a single flight:
  /// exactly one invokes `factory`, everyone else blocks until that
  /// invocation resolves and receives the same value, or the same failure.
  /// On failure nothing is installed and the in-flight marker is cleared, so
  /// the next call retries from scratch.
  ///
  /// Blocks the calling thread while waiting; use
  /// [`get_or_add_async`](TtlMap::get_or_add_async) from async contexts.
  pub fn get_or_add<F, E>(
    &self,
    key: K,
    ttl: Option<Duration>,
    factory: F,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> Result<V, E>,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
  {
    self.get_or_add_with(key, ttl, (), move |key, _| factory(key))
  }

  /// [`get_or_add`](TtlMap::get_or_add) with an extra argument forwarded to
  /// `factory`. The argument is consumed only by the caller that actually
  /// runs the factory; callers that find a live value or join an existing
  /// flight drop it.
  pub fn get_or_add_with<A, F, E>(
    &self,
    key: K,
    ttl: Option<Duration>,
    arg: A,
    factory: F,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K, A) -> Result<V, E>,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
  {
    if let Some(value) = self.try_get(&key) {
      return Ok(value);
    }

    let flight = match self.join_or_lead(&key) {
      FlightAttempt::Hit(value) => {
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(value);
      }
      FlightAttempt::Join(flight) => {
        return match flight.wait() {
          Ok(value) => {
            self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
            Ok(value)
          }
          Err(error) => Err(CacheError::Factory(error)),
        };
      }
      FlightAttempt::Lead(flight) => flight,
    };

    // This caller won the race and runs the factory with no locks held. The
    // guard retracts the registry entry on every exit path, including an
    // unwinding factory.
    let guard = FlightGuard {
      shared: &self.shared,
      key: &key,
      flight: &flight,
    };

    match factory(&key, arg) {
      Ok(value) => {
        let value = Arc::new(value);
        let ttl = self.shared.ttl_or_default(ttl);
        self.install(key.clone(), value.clone(), ttl);
        flight.complete(value.clone());
        drop(guard);
        Ok(value)
      }
      Err(error) => {
        let error: FactoryError = Arc::from(error.into());
        flight.fail(error.clone());
        drop(guard);
        self
          .shared
          .metrics
          .factory_failures
          .fetch_add(1, Ordering::Relaxed);
        Err(CacheError::Factory(error))
      }
    }
  }

  /// The asynchronous counterpart of [`get_or_add`](TtlMap::get_or_add).
  ///
  /// Waiting is cooperative: attached callers suspend on the shared flight
  /// rather than blocking a thread, and the winning caller drives its own
  /// factory future. If the winner is dropped mid-computation, the flight
  /// fails for every waiter and the marker is cleared.
  pub async fn get_or_add_async<F, Fut, E>(
    &self,
    key: K,
    ttl: Option<Duration>,
    factory: F,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(K) -> Fut,
    Fut: Future<Output = Result<V, E>>,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
  {
    if let Some(value) = self.try_get(&key) {
      return Ok(value);
    }

    let flight = match self.join_or_lead(&key) {
      FlightAttempt::Hit(value) => {
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(value);
      }
      FlightAttempt::Join(flight) => {
        return match (&*flight).await {
          Ok(value) => {
            self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
            Ok(value)
          }
          Err(error) => Err(CacheError::Factory(error)),
        };
      }
      FlightAttempt::Lead(flight) => flight,
    };

    let guard = FlightGuard {
      shared: &self.shared,
      key: &key,
      flight: &flight,
    };

    match factory(key.clone()).await {
      Ok(value) => {
        let value = Arc::new(value);
        let ttl = self.shared.ttl_or_default(ttl);
        self.install(key.clone(), value.clone(), ttl);
        flight.complete(value.clone());
        drop(guard);
        Ok(value)
      }
      Err(error) => {
        let error: FactoryError = Arc::from(error.into());
        flight.fail(error.clone());
        drop(guard);
        self
          .shared
          .metrics
          .factory_failures
          .fetch_add(1, Ordering::Relaxed);
        Err(CacheError::Factory(error))
      }
    }
  }

  /// Removes the entry for the key, live or expired. Returns whether
  /// something was actually removed, and notifies `on_remove` only then.
  pub fn remove<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let removed = { self.shared.store.shard_for(key).write().remove(key) };
    match removed {
      Some(entry) => {
        let reason = if entry.is_expired() {
          EvictionReason::Expired
        } else {
          EvictionReason::Invalidated
        };
        self
          .shared
          .metrics
          .invalidations
          .fetch_add(1, Ordering::Relaxed);
        self.shared.notify_remove(&entry.value(), reason);
        true
      }
      None => false,
    }
  }

  /// Removes the entry for the key only if it is currently expired.
  pub fn remove_if_expired<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let victim = {
      let mut guard = self.shared.store.shard_for(key).write();
      match guard.get(key) {
        Some(entry) if entry.is_expired() => guard.remove(key),
        _ => None,
      }
    };
    match victim {
      Some(entry) => {
        self
          .shared
          .metrics
          .evicted_by_ttl
          .fetch_add(1, Ordering::Relaxed);
        self
          .shared
          .notify_remove(&entry.value(), EvictionReason::Expired);
        true
      }
      None => false,
    }
  }

  /// Scans the whole store and evicts every expired entry, notifying
  /// `on_remove` for each. Returns the number removed. This is the
  /// operation a [`Sweeper`](crate::sweeper::Sweeper) drives periodically.
  pub fn remove_expired(&self) -> usize {
    let mut victims = Vec::new();
    for shard in self.shared.store.iter_shards() {
      let mut guard = shard.write();
      guard.retain(|_, entry| {
        if entry.is_expired() {
          victims.push(entry.value());
          false
        } else {
          true
        }
      });
      // One shard locked at a time; the lock drops before the next shard.
    }

    self
      .shared
      .metrics
      .evicted_by_ttl
      .fetch_add(victims.len() as u64, Ordering::Relaxed);
    for value in &victims {
      self.shared.notify_remove(value, EvictionReason::Expired);
    }
    victims.len()
  }

  /// Detaches every entry by swapping each shard's backing map for an empty
  /// one, then notifies `on_remove` for all of them outside the locks.
  /// An insert racing with `clear` lands in a fresh map and survives.
  pub fn clear(&self) {
    let mut detached = Vec::new();
    for shard in self.shared.store.iter_shards() {
      let mut guard = shard.write();
      let old_map = std::mem::replace(
        &mut *guard,
        std::collections::HashMap::with_hasher(self.shared.store.hasher.clone()),
      );
      drop(guard);
      detached.extend(old_map.into_values());
    }

    let mut live = 0u64;
    for entry in &detached {
      let reason = if entry.is_expired() {
        EvictionReason::Expired
      } else {
        live += 1;
        EvictionReason::Cleared
      };
      self.shared.notify_remove(&entry.value(), reason);
    }
    self
      .shared
      .metrics
      .invalidations
      .fetch_add(live, Ordering::Relaxed);
  }

  /// The number of physically present entries. This may include expired
  /// entries that have not been swept or touched yet; it is a documented
  /// approximation, since a strict live count would scan the whole store.
  pub fn len(&self) -> usize {
    self.shared.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// A lazy, weakly consistent iterator over live `(key, value)` pairs.
  ///
  /// One shard is locked at a time for a brief batch copy. Concurrent
  /// mutation never makes iteration fail, but entries inserted or removed
  /// mid-walk may or may not be observed.
  pub fn iter(&self) -> Iter<'_, K, V, H> {
    Iter::new(self)
  }

  /// A lazy, weakly consistent iterator over live keys.
  pub fn keys(&self) -> Keys<'_, K, V, H> {
    Keys::new(self)
  }

  /// A lazy, weakly consistent iterator over live values.
  pub fn values(&self) -> Values<'_, K, V, H> {
    Values::new(self)
  }

  /// Installs an already-shared value, evicting and notifying for any
  /// previous occupant. The shared tail of `insert` and the single-flight
  /// winners.
  fn install(&self, key: K, value: Arc<V>, ttl: Duration) {
    let entry = CacheEntry::from_shared(value.clone(), ttl);
    let evicted = {
      let mut guard = self.shared.store.shard_for(&key).write();
      guard.insert(key, entry)
    };

    if let Some(old) = evicted {
      let reason = if old.is_expired() {
        EvictionReason::Expired
      } else {
        EvictionReason::Replaced
      };
      self.shared.notify_remove(&old.value(), reason);
    }
    self.shared.notify_add(&value);
    self.shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
  }

  /// Resolves this caller's role in the single-flight protocol for `key`.
  ///
  /// Holds the registry shard lock while re-checking the store, so a winner
  /// that installed and retracted between our miss and this call is seen
  /// as a hit rather than spawning a redundant flight.
  fn join_or_lead(&self, key: &K) -> FlightAttempt<V> {
    let flights = self.shared.flight_shard(key);
    let mut guard = flights.lock();

    if let Some(value) = self.peek(key) {
      return FlightAttempt::Hit(value);
    }

    match guard.get(key) {
      Some(flight) => FlightAttempt::Join(flight.clone()),
      None => {
        let flight = Arc::new(Flight::new());
        guard.insert(key.clone(), flight.clone());
        FlightAttempt::Lead(flight)
      }
    }
  }
}

/// Scoped cleanup for a single-flight winner: retracts the registry entry
/// and, if the factory unwound before resolving the flight, fails it so
/// waiters are released instead of parking forever.
struct FlightGuard<'a, K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  shared: &'a MapShared<K, V, H>,
  key: &'a K,
  flight: &'a Arc<Flight<V>>,
}

impl<K, V, H> Drop for FlightGuard<'_, K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn drop(&mut self) {
    self.shared.flight_shard(self.key).lock().remove(self.key);
    if self.flight.is_pending() {
      self.flight.fail(Arc::new(FactoryAborted));
    }
  }
}
