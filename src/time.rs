use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all expiry arithmetic in the crate.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// The current time as nanoseconds since the crate epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  let since_epoch = Instant::now().saturating_duration_since(*CACHE_EPOCH);
  u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
}

/// The absolute expiry stamp for an entry created now with the given TTL.
#[inline]
pub(crate) fn expiry_stamp(ttl: Duration) -> u64 {
  let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
  now_nanos().saturating_add(ttl_nanos)
}
