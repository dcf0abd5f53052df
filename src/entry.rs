use crate::time;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A container for a value in a store, paired with its expiry stamp.
///
/// The expiry stamp is always set at construction; an entry whose stamp is in
/// the past is expired and must be treated as absent by every read path, even
/// while still physically present in the backing collection.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  value: Arc<V>,
  /// The expiration timestamp in nanoseconds since the crate epoch.
  expires_at: AtomicU64,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: V, ttl: Duration) -> Self {
    Self {
      value: Arc::new(value),
      expires_at: AtomicU64::new(time::expiry_stamp(ttl)),
    }
  }

  /// Creates an entry around an already-shared value. Used when installing
  /// the result of a shared computation.
  pub(crate) fn from_shared(value: Arc<V>, ttl: Duration) -> Self {
    Self {
      value,
      expires_at: AtomicU64::new(time::expiry_stamp(ttl)),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn value_ref(&self) -> &V {
    &self.value
  }

  #[inline]
  pub(crate) fn is_expired(&self) -> bool {
    time::now_nanos() >= self.expires_at.load(Ordering::Relaxed)
  }

  /// Pushes the expiry stamp out to `now + ttl`. A cheap atomic store.
  #[inline]
  pub(crate) fn renew(&self, ttl: Duration) {
    self
      .expires_at
      .store(time::expiry_stamp(ttl), Ordering::Relaxed);
  }

  /// Swaps the stored value in place. Requires the exclusive section of the
  /// owning store.
  #[inline]
  pub(crate) fn replace_value(&mut self, value: V) {
    self.value = Arc::new(value);
  }
}
