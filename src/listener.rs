use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry was removed from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
  /// The entry's time-to-live elapsed.
  Expired,
  /// The entry was overwritten by a new one for the same key or slot.
  Replaced,
  /// The entry was removed by an explicit call.
  Invalidated,
  /// The entry was detached by `clear`.
  Cleared,
}

impl fmt::Display for EvictionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EvictionReason::Expired => write!(f, "expired (TTL)"),
      EvictionReason::Replaced => write!(f, "replaced by a new entry"),
      EvictionReason::Invalidated => write!(f, "manually invalidated"),
      EvictionReason::Cleared => write!(f, "removed by clear"),
    }
  }
}

/// An observer registered with a store to receive entry lifecycle
/// notifications.
///
/// `on_add` is called after an entry becomes live; `on_remove` after an entry
/// is evicted for any [`EvictionReason`]. Neither is called for the silent
/// renew path of `add_or_renew`.
///
/// Listeners always run after the store has released its internal locks, so a
/// listener may freely read or mutate other stores (or this one). The store's
/// own reference to the value is released only after every listener has run;
/// a removed value with no other holders is dropped immediately afterwards.
pub trait CacheListener<V>: Send + Sync {
  fn on_add(&self, _value: &V) {}
  fn on_remove(&self, _value: &V, _reason: EvictionReason) {}
}

impl<V, L> CacheListener<V> for Arc<L>
where
  L: CacheListener<V> + ?Sized,
{
  fn on_add(&self, value: &V) {
    (**self).on_add(value)
  }

  fn on_remove(&self, value: &V, reason: EvictionReason) {
    (**self).on_remove(value, reason)
  }
}

/// Adapter turning a plain closure into an add-only listener.
pub(crate) struct AddFn<F>(pub(crate) F);

impl<V, F> CacheListener<V> for AddFn<F>
where
  F: Fn(&V) + Send + Sync,
{
  fn on_add(&self, value: &V) {
    (self.0)(value)
  }
}

/// Adapter turning a plain closure into a remove-only listener.
pub(crate) struct RemoveFn<F>(pub(crate) F);

impl<V, F> CacheListener<V> for RemoveFn<F>
where
  F: Fn(&V, EvictionReason) + Send + Sync,
{
  fn on_remove(&self, value: &V, reason: EvictionReason) {
    (self.0)(value, reason)
  }
}
