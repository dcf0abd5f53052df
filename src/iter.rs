//! Types for iterating over a keyed store's contents.

use crate::map::TtlMap;

use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

const ITER_BATCH_SIZE: usize = 64;

/// A lazy iterator over the live key-value pairs of a [`TtlMap`].
///
/// Items are fetched in batches, holding a lock on only one shard at a time
/// for a brief period. This is **not** a point-in-time snapshot: entries
/// inserted after a shard has been scanned are missed, and entries may be
/// mutated or removed by other threads while iteration is in progress.
/// Concurrent mutation never makes the walk fail.
pub struct Iter<'a, K, V, H> {
  map: &'a TtlMap<K, V, H>,
  buffer: VecDeque<(K, Arc<V>)>,
  shard_index: usize,
  items_seen_in_shard: usize,
  finished: bool,
}

impl<'a, K, V, H> Iter<'a, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(map: &'a TtlMap<K, V, H>) -> Self {
    Self {
      map,
      buffer: VecDeque::with_capacity(ITER_BATCH_SIZE),
      shard_index: 0,
      items_seen_in_shard: 0,
      finished: false,
    }
  }

  /// Fills the internal buffer with the next batch of live items.
  fn refill_buffer(&mut self) {
    if self.finished {
      return;
    }

    let shards = &self.map.shared.store.shards;

    while self.shard_index < shards.len() && self.buffer.len() < ITER_BATCH_SIZE {
      let guard = shards[self.shard_index].read();

      if self.items_seen_in_shard >= guard.len() {
        self.shard_index += 1;
        self.items_seen_in_shard = 0;
        continue;
      }

      let batch = guard
        .iter()
        .skip(self.items_seen_in_shard)
        .take(ITER_BATCH_SIZE - self.buffer.len())
        .map(|(key, entry)| {
          if entry.is_expired() {
            None
          } else {
            Some((key.clone(), entry.value()))
          }
        })
        .collect::<Vec<_>>();

      self.items_seen_in_shard += batch.len();
      self.buffer.extend(batch.into_iter().flatten());
    } // The shard lock is released here before the next round.

    if self.shard_index >= shards.len() {
      self.finished = true;
    }
  }
}

impl<K, V, H> Iterator for Iter<'_, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  type Item = (K, Arc<V>);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some(item) = self.buffer.pop_front() {
        return Some(item);
      }
      if self.finished {
        return None;
      }
      self.refill_buffer();
      if self.buffer.is_empty() && self.finished {
        return None;
      }
    }
  }
}

/// A lazy iterator over the live keys of a [`TtlMap`]. Shares the weak
/// consistency guarantees of [`Iter`].
pub struct Keys<'a, K, V, H> {
  inner: Iter<'a, K, V, H>,
}

impl<'a, K, V, H> Keys<'a, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(map: &'a TtlMap<K, V, H>) -> Self {
    Self {
      inner: Iter::new(map),
    }
  }
}

impl<K, V, H> Iterator for Keys<'_, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  type Item = K;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|(key, _)| key)
  }
}

/// A lazy iterator over the live values of a [`TtlMap`]. Shares the weak
/// consistency guarantees of [`Iter`].
pub struct Values<'a, K, V, H> {
  inner: Iter<'a, K, V, H>,
}

impl<'a, K, V, H> Values<'a, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(map: &'a TtlMap<K, V, H>) -> Self {
    Self {
      inner: Iter::new(map),
    }
  }
}

impl<K, V, H> Iterator for Values<'_, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  type Item = Arc<V>;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.next().map(|(_, value)| value)
  }
}
