mod common;

use common::build_map;

use std::thread;
use std::time::Duration;

const TINY_TTL: Duration = Duration::from_millis(10);
const LONG_TTL: Duration = Duration::from_secs(60);
const SLEEP_MARGIN: Duration = Duration::from_millis(40);

#[test]
fn test_item_expires_after_ttl() {
  let map = build_map(LONG_TTL);

  map.insert("key".to_string(), "value".to_string(), Some(TINY_TTL));
  assert!(map.try_get("key").is_some());

  thread::sleep(TINY_TTL + SLEEP_MARGIN);
  assert!(map.try_get("key").is_none(), "item should have expired");
  // The expired read evicted lazily, so the physical count dropped too.
  assert_eq!(map.len(), 0);

  let metrics = map.metrics();
  assert_eq!(metrics.hits, 1);
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.evicted_by_ttl, 1);
}

#[test]
fn test_ttl_is_not_reset_on_access() {
  let map = build_map(LONG_TTL);

  map.insert(
    "key".to_string(),
    "value".to_string(),
    Some(Duration::from_millis(100)),
  );
  thread::sleep(Duration::from_millis(50));
  assert!(map.try_get("key").is_some());
  thread::sleep(Duration::from_millis(50) + SLEEP_MARGIN);
  assert!(
    map.try_get("key").is_none(),
    "item should have expired despite access"
  );
}

#[test]
fn test_per_call_ttl_overrides_default() {
  let map = build_map(TINY_TTL);

  map.insert("short".to_string(), "v".to_string(), None);
  map.insert("long".to_string(), "v".to_string(), Some(LONG_TTL));
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert!(map.try_get("short").is_none());
  assert!(map.try_get("long").is_some());
}

#[test]
fn test_zero_ttl_is_born_expired() {
  let map = build_map(LONG_TTL);

  map.insert("key".to_string(), "value".to_string(), Some(Duration::ZERO));
  assert!(map.try_get("key").is_none());
}

#[test]
fn test_add_or_renew_extends_expiry() {
  let map = build_map(LONG_TTL);

  map.insert(
    "key".to_string(),
    "value".to_string(),
    Some(Duration::from_millis(80)),
  );
  thread::sleep(Duration::from_millis(40));
  map.add_or_renew(
    "key".to_string(),
    "value".to_string(),
    Some(Duration::from_millis(200)),
  );
  thread::sleep(Duration::from_millis(80));

  // Past the original deadline, inside the renewed one.
  assert!(map.try_get("key").is_some());
}

#[test]
fn test_remove_if_expired() {
  let map = build_map(LONG_TTL);

  map.insert("key".to_string(), "value".to_string(), Some(TINY_TTL));
  assert!(!map.remove_if_expired("key"), "entry is still live");

  thread::sleep(TINY_TTL + SLEEP_MARGIN);
  assert!(map.remove_if_expired("key"));
  assert_eq!(map.len(), 0);
  assert!(!map.remove_if_expired("key"), "already removed");
}

#[test]
fn test_sweep_accounting() {
  let map = build_map(LONG_TTL);

  for i in 0..3 {
    map.insert(format!("stale-{i}"), "v".to_string(), Some(TINY_TTL));
  }
  for i in 0..2 {
    map.insert(format!("live-{i}"), "v".to_string(), None);
  }
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert_eq!(map.remove_expired(), 3);
  assert_eq!(map.len(), 2);
  assert_eq!(map.metrics().evicted_by_ttl, 3);

  // A second sweep finds nothing left to do.
  assert_eq!(map.remove_expired(), 0);
}

#[test]
fn test_peek_leaves_expired_entry_in_place() {
  let map = build_map(LONG_TTL);

  map.insert("key".to_string(), "value".to_string(), Some(TINY_TTL));
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert!(map.peek("key").is_none());
  // peek reports the entry absent but does not evict it, so the physical
  // count still includes it until a lazy read or sweep runs.
  assert_eq!(map.len(), 1);

  assert!(map.try_get("key").is_none());
  assert_eq!(map.len(), 0);
}

#[test]
fn test_contains_key_evicts_expired_entry() {
  let map = build_map(LONG_TTL);

  map.insert("key".to_string(), "value".to_string(), Some(TINY_TTL));
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert!(!map.contains_key("key"));
  assert_eq!(map.len(), 0);
}
