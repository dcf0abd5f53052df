use crate::entry::CacheEntry;
use crate::error::{CacheError, FactoryAborted, FactoryError};
use crate::flight::{Flight, FlightAttempt};
use crate::listener::{CacheListener, EvictionReason};

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A thread-safe single-slot store whose occupant expires after a
/// time-to-live.
///
/// The same contract as [`TtlMap`](crate::map::TtlMap), restricted to one
/// implicit key: lazy expiry on read, evict-then-install on write, a silent
/// [`renew`](TtlCell::renew), and single-flight
/// [`get_or_set`](TtlCell::get_or_set). One mutex guards the slot; reads of
/// an already-live value take it only briefly.
pub struct TtlCell<V> {
  slot: Mutex<Option<CacheEntry<V>>>,
  inflight: Mutex<Option<Arc<Flight<V>>>>,
  default_ttl: Duration,
  listeners: Vec<Arc<dyn CacheListener<V>>>,
}

impl<V> fmt::Debug for TtlCell<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TtlCell")
      .field("default_ttl", &self.default_ttl)
      .field("listeners", &self.listeners.len())
      .finish_non_exhaustive()
  }
}

impl<V> TtlCell<V> {
  pub fn new(default_ttl: Duration) -> Self {
    Self {
      slot: Mutex::new(None),
      inflight: Mutex::new(None),
      default_ttl,
      listeners: Vec::new(),
    }
  }

  /// Registers a lifecycle listener. Listeners run in registration order,
  /// always outside the slot lock.
  pub fn listener<L>(mut self, listener: L) -> Self
  where
    L: CacheListener<V> + 'static,
  {
    self.listeners.push(Arc::new(listener));
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Returns the live occupant, if any. An expired occupant is evicted
  /// (notifying `on_remove`) and reported as absent.
  pub fn value(&self) -> Option<Arc<V>> {
    let mut victim = None;
    let hit = {
      let mut slot = self.slot.lock();
      match &*slot {
        Some(entry) if !entry.is_expired() => Some(entry.value()),
        Some(_) => {
          victim = slot.take().map(|entry| entry.value());
          None
        }
        None => None,
      }
    };

    if let Some(old) = &victim {
      self.notify_remove(old, EvictionReason::Expired);
    }
    hit
  }

  /// Installs a new occupant expiring `ttl` from now (`None` uses the cell
  /// default). A previous occupant is evicted first, notifying `on_remove`
  /// before the new occupant's `on_add`.
  pub fn set(&self, value: V, ttl: Option<Duration>) {
    let ttl = ttl.unwrap_or(self.default_ttl);
    self.install(Arc::new(value), ttl);
  }

  /// Equivalent to [`value`](TtlCell::value) discarding the result,
  /// including the lazy-eviction side effect.
  pub fn has_value(&self) -> bool {
    self.value().is_some()
  }

  /// Pushes the occupant's expiry out to `ttl` from now without touching
  /// the value and without any notification. Returns `false` if the cell is
  /// empty or the occupant already expired.
  pub fn renew(&self, ttl: Option<Duration>) -> bool {
    let ttl = ttl.unwrap_or(self.default_ttl);
    let slot = self.slot.lock();
    match &*slot {
      Some(entry) if !entry.is_expired() => {
        entry.renew(ttl);
        true
      }
      _ => false,
    }
  }

  /// Empties the cell, notifying `on_remove` if it held anything.
  pub fn clear(&self) {
    let removed = { self.slot.lock().take() };
    if let Some(entry) = removed {
      let reason = if entry.is_expired() {
        EvictionReason::Expired
      } else {
        EvictionReason::Invalidated
      };
      self.notify_remove(&entry.value(), reason);
    }
  }

  /// Evicts the occupant only if it is currently expired. Returns the
  /// number removed (0 or 1), the shape the sweep coordinator consumes.
  pub fn remove_expired(&self) -> usize {
    let victim = {
      let mut slot = self.slot.lock();
      match &*slot {
        Some(entry) if entry.is_expired() => slot.take(),
        _ => None,
      }
    };
    match victim {
      Some(entry) => {
        self.notify_remove(&entry.value(), EvictionReason::Expired);
        1
      }
      None => 0,
    }
  }

  /// Returns the live occupant, or computes one with `factory`.
  ///
  /// The same single-flight guarantee as
  /// [`TtlMap::get_or_add`](crate::map::TtlMap::get_or_add), scoped to this
  /// one slot: a live value is returned without coordination, exactly one of
  /// the racing callers runs `factory`, and its result or failure reaches
  /// every waiter. Blocks while waiting; use
  /// [`get_or_set_async`](TtlCell::get_or_set_async) from async contexts.
  pub fn get_or_set<F, E>(&self, ttl: Option<Duration>, factory: F) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce() -> Result<V, E>,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
  {
    if let Some(value) = self.value() {
      return Ok(value);
    }

    let flight = match self.join_or_lead() {
      FlightAttempt::Hit(value) => return Ok(value),
      FlightAttempt::Join(flight) => {
        return flight.wait().map_err(CacheError::Factory);
      }
      FlightAttempt::Lead(flight) => flight,
    };

    let guard = CellFlightGuard {
      cell: self,
      flight: &flight,
    };

    match factory() {
      Ok(value) => {
        let value = Arc::new(value);
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.install(value.clone(), ttl);
        flight.complete(value.clone());
        drop(guard);
        Ok(value)
      }
      Err(error) => {
        let error: FactoryError = Arc::from(error.into());
        flight.fail(error.clone());
        drop(guard);
        Err(CacheError::Factory(error))
      }
    }
  }

  /// The asynchronous counterpart of [`get_or_set`](TtlCell::get_or_set).
  /// Waiters suspend cooperatively; the winner drives its own factory
  /// future.
  pub async fn get_or_set_async<F, Fut, E>(
    &self,
    ttl: Option<Duration>,
    factory: F,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
  {
    if let Some(value) = self.value() {
      return Ok(value);
    }

    let flight = match self.join_or_lead() {
      FlightAttempt::Hit(value) => return Ok(value),
      FlightAttempt::Join(flight) => {
        return (&*flight).await.map_err(CacheError::Factory);
      }
      FlightAttempt::Lead(flight) => flight,
    };

    let guard = CellFlightGuard {
      cell: self,
      flight: &flight,
    };

    match factory().await {
      Ok(value) => {
        let value = Arc::new(value);
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.install(value.clone(), ttl);
        flight.complete(value.clone());
        drop(guard);
        Ok(value)
      }
      Err(error) => {
        let error: FactoryError = Arc::from(error.into());
        flight.fail(error.clone());
        drop(guard);
        Err(CacheError::Factory(error))
      }
    }
  }

  fn install(&self, value: Arc<V>, ttl: Duration) {
    let entry = CacheEntry::from_shared(value.clone(), ttl);
    let old = { self.slot.lock().replace(entry) };

    if let Some(old_entry) = old {
      let reason = if old_entry.is_expired() {
        EvictionReason::Expired
      } else {
        EvictionReason::Replaced
      };
      self.notify_remove(&old_entry.value(), reason);
    }
    self.notify_add(&value);
  }

  fn join_or_lead(&self) -> FlightAttempt<V> {
    let mut inflight = self.inflight.lock();

    if let Some(value) = self.peek_live() {
      return FlightAttempt::Hit(value);
    }

    match &*inflight {
      Some(flight) => FlightAttempt::Join(flight.clone()),
      None => {
        let flight = Arc::new(Flight::new());
        *inflight = Some(flight.clone());
        FlightAttempt::Lead(flight)
      }
    }
  }

  fn peek_live(&self) -> Option<Arc<V>> {
    let slot = self.slot.lock();
    match &*slot {
      Some(entry) if !entry.is_expired() => Some(entry.value()),
      _ => None,
    }
  }

  fn notify_add(&self, value: &V) {
    for listener in &self.listeners {
      listener.on_add(value);
    }
  }

  fn notify_remove(&self, value: &V, reason: EvictionReason) {
    for listener in &self.listeners {
      listener.on_remove(value, reason);
    }
  }
}

/// Scoped cleanup for the cell's single-flight winner.
struct CellFlightGuard<'a, V> {
  cell: &'a TtlCell<V>,
  flight: &'a Arc<Flight<V>>,
}

impl<V> Drop for CellFlightGuard<'_, V> {
  fn drop(&mut self) {
    {
      let mut inflight = self.cell.inflight.lock();
      if let Some(current) = &*inflight {
        if Arc::ptr_eq(current, self.flight) {
          *inflight = None;
        }
      }
    }
    if self.flight.is_pending() {
      self.flight.fail(Arc::new(FactoryAborted));
    }
  }
}
