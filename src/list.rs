use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::listener::{CacheListener, EvictionReason};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A position-indexed sequence of expiring values.
///
/// Element identity is its list position, which shifts on insert and remove.
/// Expired elements are treated as absent by every read — [`len`](TtlList::len)
/// counts live elements only, scans skip them — but stay physically present
/// until touched by an indexer, removed, or compacted by
/// [`remove_expired`](TtlList::remove_expired). Indices are physical
/// positions, so an expired hole still occupies its slot until then.
///
/// One exclusive lock serializes every operation; list use cases are
/// expected to be low-cardinality. Listeners still run outside the lock.
pub struct TtlList<V> {
  items: Mutex<Vec<CacheEntry<V>>>,
  default_ttl: Duration,
  listeners: Vec<Arc<dyn CacheListener<V>>>,
}

impl<V> fmt::Debug for TtlList<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TtlList")
      .field("default_ttl", &self.default_ttl)
      .field("listeners", &self.listeners.len())
      .finish_non_exhaustive()
  }
}

impl<V> TtlList<V> {
  pub fn new(default_ttl: Duration) -> Self {
    Self {
      items: Mutex::new(Vec::new()),
      default_ttl,
      listeners: Vec::new(),
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

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Appends a value expiring `ttl` from now (`None` uses the list
  /// default), notifying `on_add`.
  pub fn push(&self, value: V, ttl: Option<Duration>) {
    let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
    let added = entry.value();
    {
      self.items.lock().push(entry);
    }
    self.notify_add(&added);
  }

  /// Inserts a value at the given physical position, shifting everything
  /// after it. `index` may equal the physical length (append).
  pub fn insert(&self, index: usize, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
    let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
    let added = entry.value();
    {
      let mut items = self.items.lock();
      let len = items.len();
      if index > len {
        return Err(CacheError::IndexOutOfRange { index, len });
      }
      items.insert(index, entry);
    }
    self.notify_add(&added);
    Ok(())
  }

  /// Returns the live value at the given position.
  ///
  /// An expired occupant is lazily evicted — notifying `on_remove` and
  /// shifting later positions down — and the access fails with
  /// [`CacheError::IndexOutOfRange`], as does an index past the end.
  pub fn get(&self, index: usize) -> Result<Arc<V>, CacheError> {
    let mut victim = None;
    let result = {
      let mut items = self.items.lock();
      let len = items.len();
      match items.get(index) {
        Some(entry) if !entry.is_expired() => Ok(entry.value()),
        Some(_) => {
          victim = Some(items.remove(index));
          Err(CacheError::IndexOutOfRange {
            index,
            len: len - 1,
          })
        }
        None => Err(CacheError::IndexOutOfRange { index, len }),
      }
    };

    if let Some(entry) = &victim {
      self.notify_remove(&entry.value(), EvictionReason::Expired);
    }
    result
  }

  /// Replaces the occupant at the given position, evicting it (notifying
  /// `on_remove`) and installing the new value (notifying `on_add`).
  pub fn set(&self, index: usize, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
    let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
    let added = entry.value();
    let old = {
      let mut items = self.items.lock();
      let len = items.len();
      match items.get_mut(index) {
        Some(slot) => std::mem::replace(slot, entry),
        None => return Err(CacheError::IndexOutOfRange { index, len }),
      }
    };

    let reason = if old.is_expired() {
      EvictionReason::Expired
    } else {
      EvictionReason::Replaced
    };
    self.notify_remove(&old.value(), reason);
    self.notify_add(&added);
    Ok(())
  }

  /// Renews the first live element equal to `value` in place — new value,
  /// new expiry, **no notification** — or appends it (notifying `on_add`)
  /// if no live match exists.
  pub fn add_or_renew(&self, value: V, ttl: Option<Duration>)
  where
    V: PartialEq,
  {
    let ttl = ttl.unwrap_or(self.default_ttl);
    let added = {
      let mut items = self.items.lock();
      let found = items
        .iter()
        .position(|entry| !entry.is_expired() && *entry.value_ref() == value);
      match found {
        Some(index) => {
          // Renewed in place; no listener fires.
          let entry = &mut items[index];
          entry.replace_value(value);
          entry.renew(ttl);
          None
        }
        None => {
          let entry = CacheEntry::new(value, ttl);
          let added = entry.value();
          items.push(entry);
          Some(added)
        }
      }
    };

    if let Some(added) = &added {
      self.notify_add(added);
    }
  }

  /// Removes the first live element equal to `value`, notifying
  /// `on_remove`. Returns whether anything was removed.
  pub fn remove(&self, value: &V) -> bool
  where
    V: PartialEq,
  {
    let victim = {
      let mut items = self.items.lock();
      match items
        .iter()
        .position(|entry| !entry.is_expired() && entry.value_ref() == value)
      {
        Some(index) => Some(items.remove(index)),
        None => None,
      }
    };

    match victim {
      Some(entry) => {
        self.notify_remove(&entry.value(), EvictionReason::Invalidated);
        true
      }
      None => false,
    }
  }

  /// Removes whatever physically occupies the given position, notifying
  /// `on_remove` (an expired occupant is reported as expired).
  pub fn remove_at(&self, index: usize) -> Result<(), CacheError> {
    let victim = {
      let mut items = self.items.lock();
      let len = items.len();
      if index >= len {
        return Err(CacheError::IndexOutOfRange { index, len });
      }
      items.remove(index)
    };

    let reason = if victim.is_expired() {
      EvictionReason::Expired
    } else {
      EvictionReason::Invalidated
    };
    self.notify_remove(&victim.value(), reason);
    Ok(())
  }

  /// Whether any live element equals `value`. Expired elements are skipped
  /// without being compacted.
  pub fn contains(&self, value: &V) -> bool
  where
    V: PartialEq,
  {
    self
      .items
      .lock()
      .iter()
      .any(|entry| !entry.is_expired() && entry.value_ref() == value)
  }

  /// The physical position of the first live element equal to `value`.
  pub fn index_of(&self, value: &V) -> Option<usize>
  where
    V: PartialEq,
  {
    self
      .items
      .lock()
      .iter()
      .position(|entry| !entry.is_expired() && entry.value_ref() == value)
  }

  /// A snapshot of the live values, in list order.
  pub fn to_vec(&self) -> Vec<Arc<V>> {
    self
      .items
      .lock()
      .iter()
      .filter(|entry| !entry.is_expired())
      .map(|entry| entry.value())
      .collect()
  }

  /// Iterates over a snapshot of the live values taken when called.
  pub fn iter(&self) -> impl Iterator<Item = Arc<V>> {
    self.to_vec().into_iter()
  }

  /// The number of live elements. Unlike the keyed store, this never counts
  /// expired slots, at the cost of an O(n) scan.
  pub fn len(&self) -> usize {
    self
      .items
      .lock()
      .iter()
      .filter(|entry| !entry.is_expired())
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Detaches every element in one step, then notifies `on_remove` for each
  /// outside the lock.
  pub fn clear(&self) {
    let drained = { std::mem::take(&mut *self.items.lock()) };
    for entry in &drained {
      let reason = if entry.is_expired() {
        EvictionReason::Expired
      } else {
        EvictionReason::Cleared
      };
      self.notify_remove(&entry.value(), reason);
    }
  }

  /// Compacts every currently-expired slot, notifying `on_remove` for each,
  /// and returns the count removed.
  pub fn remove_expired(&self) -> usize {
    let mut victims = Vec::new();
    {
      let mut items = self.items.lock();
      items.retain(|entry| {
        if entry.is_expired() {
          victims.push(entry.value());
          false
        } else {
          true
        }
      });
    }

    for value in &victims {
      self.notify_remove(value, EvictionReason::Expired);
    }
    victims.len()
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
