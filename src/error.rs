use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A shared handle to the failure produced by a user-supplied value factory.
///
/// The same failure is delivered to every caller attached to the computation,
/// so it is reference-counted rather than owned.
pub type FactoryError = Arc<dyn Error + Send + Sync + 'static>;

/// Errors that can occur when building a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The store was configured with a zero default TTL. Entries must always
  /// carry an expiry.
  ZeroDefaultTtl,
  /// The store was configured with zero shards, which is not allowed.
  ZeroShards,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroDefaultTtl => write!(f, "default TTL cannot be zero"),
      BuildError::ZeroShards => write!(f, "shard count cannot be zero"),
    }
  }
}

impl Error for BuildError {}

/// Errors surfaced by store operations.
#[derive(Debug, Clone)]
pub enum CacheError {
  /// The key is absent, or its entry has expired.
  KeyNotFound,
  /// A list index points at no live slot.
  IndexOutOfRange { index: usize, len: usize },
  /// The user-supplied value factory failed. Every caller attached to the
  /// computation receives the same failure.
  Factory(FactoryError),
}

impl fmt::Display for CacheError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheError::KeyNotFound => write!(f, "key not found or expired"),
      CacheError::IndexOutOfRange { index, len } => {
        write!(f, "index {} out of range for list of length {}", index, len)
      }
      CacheError::Factory(err) => write!(f, "value factory failed: {}", err),
    }
  }
}

impl Error for CacheError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      CacheError::Factory(err) => Some(&**err),
      _ => None,
    }
  }
}

/// The failure delivered to waiters when a factory panics, or when the caller
/// driving an asynchronous factory is dropped before it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryAborted;

impl fmt::Display for FactoryAborted {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "value factory aborted before producing a result")
  }
}

impl Error for FactoryAborted {}
