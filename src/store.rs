use crate::entry::CacheEntry;

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<Q, H>(hasher: &H, key: &Q) -> u64
where
  Q: Hash + ?Sized,
  H: BuildHasher,
{
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

pub(crate) type ShardMap<K, V, H> = HashMap<K, CacheEntry<V>, H>;

/// A store that is partitioned into multiple, independently locked shards.
///
/// Operations on different keys are unlikely to contend for the same lock,
/// so unrelated keys proceed concurrently. The shard count is always a power
/// of two, so shard selection is a mask of the key hash.
pub(crate) struct ShardedStore<K, V, H> {
  pub(crate) shards: Box<[CachePadded<RwLock<ShardMap<K, V, H>>>]>,
  pub(crate) hasher: H,
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore`. `num_shards` must be a power of two,
  /// validated by the builder.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = ShardMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  #[inline]
  pub(crate) fn shard_index<Q>(&self, key: &Q) -> usize
  where
    Q: Hash + ?Sized,
  {
    hash_key(&self.hasher, key) as usize & (self.shards.len() - 1)
  }

  /// Returns the lock guarding the shard for a given key.
  #[inline]
  pub(crate) fn shard_for<Q>(&self, key: &Q) -> &RwLock<ShardMap<K, V, H>>
  where
    Q: Hash + ?Sized,
  {
    &self.shards[self.shard_index(key)]
  }

  /// Returns an iterator over all the shard locks, for whole-store
  /// operations like `clear` and the expiry sweep.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &RwLock<ShardMap<K, V, H>>> {
    self.shards.iter().map(|padded_lock| &**padded_lock)
  }

  /// The number of physically present entries across all shards, including
  /// expired ones that have not been swept yet.
  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }
}
