mod common;

use common::{drain, recording_listener, Event};
use lapse::{CacheListener, EvictionReason, TtlMap};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, OnceLock};
use std::thread;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn build_recording_map() -> (TtlMap<String, String>, mpsc::Receiver<Event>) {
  let (listener, rx) = recording_listener();
  let map = TtlMap::builder()
    .default_ttl(TTL)
    .listener(listener)
    .build()
    .unwrap();
  (map, rx)
}

#[test]
fn test_insert_fires_add() {
  let (map, rx) = build_recording_map();

  map.insert("key".to_string(), "one".to_string(), None);
  assert_eq!(drain(&rx), vec![Event::Add("one".to_string())]);
}

#[test]
fn test_replace_fires_remove_then_add() {
  let (map, rx) = build_recording_map();

  map.insert("key".to_string(), "one".to_string(), None);
  map.insert("key".to_string(), "two".to_string(), None);

  assert_eq!(
    drain(&rx),
    vec![
      Event::Add("one".to_string()),
      Event::Remove("one".to_string(), EvictionReason::Replaced),
      Event::Add("two".to_string()),
    ]
  );
}

#[test]
fn test_renew_is_silent() {
  let (map, rx) = build_recording_map();

  map.insert("key".to_string(), "one".to_string(), None);
  drain(&rx);

  map.add_or_renew("key".to_string(), "two".to_string(), None);
  assert_eq!(drain(&rx), vec![], "renew must fire no notification");
  assert_eq!(*map.try_get("key").unwrap(), "two");
}

#[test]
fn test_remove_fires_invalidated() {
  let (map, rx) = build_recording_map();

  map.insert("key".to_string(), "one".to_string(), None);
  drain(&rx);

  map.remove("key");
  assert_eq!(
    drain(&rx),
    vec![Event::Remove("one".to_string(), EvictionReason::Invalidated)]
  );
}

#[test]
fn test_expired_read_fires_expired() {
  let (map, rx) = build_recording_map();

  map.insert(
    "key".to_string(),
    "one".to_string(),
    Some(Duration::from_millis(10)),
  );
  drain(&rx);
  thread::sleep(Duration::from_millis(50));

  assert!(map.try_get("key").is_none());
  assert_eq!(
    drain(&rx),
    vec![Event::Remove("one".to_string(), EvictionReason::Expired)]
  );
}

#[test]
fn test_insert_over_expired_entry_reports_expired() {
  let (map, rx) = build_recording_map();

  map.insert(
    "key".to_string(),
    "stale".to_string(),
    Some(Duration::from_millis(10)),
  );
  drain(&rx);
  thread::sleep(Duration::from_millis(50));

  map.insert("key".to_string(), "fresh".to_string(), None);
  assert_eq!(
    drain(&rx),
    vec![
      Event::Remove("stale".to_string(), EvictionReason::Expired),
      Event::Add("fresh".to_string()),
    ]
  );
}

#[test]
fn test_clear_fires_cleared_for_every_live_entry() {
  let (map, rx) = build_recording_map();

  for i in 0..4 {
    map.insert(format!("key-{i}"), format!("value-{i}"), None);
  }
  drain(&rx);

  map.clear();
  let events = drain(&rx);
  assert_eq!(events.len(), 4);
  assert!(events
    .iter()
    .all(|event| matches!(event, Event::Remove(_, EvictionReason::Cleared))));
  assert_eq!(map.len(), 0);
}

#[test]
fn test_sweep_notifies_per_victim() {
  let (map, rx) = build_recording_map();

  for i in 0..3 {
    map.insert(format!("key-{i}"), format!("value-{i}"), Some(Duration::from_millis(10)));
  }
  drain(&rx);
  thread::sleep(Duration::from_millis(50));

  assert_eq!(map.remove_expired(), 3);
  let events = drain(&rx);
  assert_eq!(events.len(), 3);
  assert!(events
    .iter()
    .all(|event| matches!(event, Event::Remove(_, EvictionReason::Expired))));
}

#[test]
fn test_clear_racing_insert_never_silently_drops_the_entry() {
  for _ in 0..50 {
    let (map, rx) = build_recording_map();
    for i in 0..8 {
      map.insert(format!("seed-{i}"), "seed".to_string(), None);
    }
    drain(&rx);

    let barrier = Arc::new(Barrier::new(2));
    let writer = {
      let map = map.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        map.insert("racer".to_string(), "racer".to_string(), None);
      })
    };
    let clearer = {
      let map = map.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        map.clear();
      })
    };
    writer.join().unwrap();
    clearer.join().unwrap();

    // Whichever side of the swap the insert landed on, the entry either
    // survived in the fresh map or was detached with a notification.
    let events = drain(&rx);
    let racer_removed = events.iter().any(|event| {
      matches!(event, Event::Remove(value, EvictionReason::Cleared) if value == "racer")
    });
    let racer_present = map.try_get("racer").is_some();
    assert!(
      racer_present || racer_removed,
      "racing insert was silently dropped"
    );
  }
}

/// A value whose drop is observable, to pin down the release ordering: the
/// store must let go of its reference only after listeners have run.
struct Tracked {
  dropped: Arc<AtomicBool>,
}

impl Drop for Tracked {
  fn drop(&mut self) {
    self.dropped.store(true, Ordering::SeqCst);
  }
}

struct DropOrderListener {
  dropped: Arc<AtomicBool>,
}

impl CacheListener<Tracked> for DropOrderListener {
  fn on_remove(&self, value: &Tracked, _reason: EvictionReason) {
    assert!(
      !value.dropped.load(Ordering::SeqCst),
      "value must still be alive while listeners run"
    );
  }
}

#[test]
fn test_value_dropped_after_removal_listener() {
  let dropped = Arc::new(AtomicBool::new(false));
  let map = TtlMap::builder()
    .default_ttl(TTL)
    .listener(DropOrderListener {
      dropped: dropped.clone(),
    })
    .build()
    .unwrap();

  map.insert(
    "key".to_string(),
    Tracked {
      dropped: dropped.clone(),
    },
    None,
  );
  assert!(map.remove("key"));

  // No other holder remains, so the value was dropped right after the
  // listener observed it.
  assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_listeners_locking_another_store_do_not_deadlock() {
  let peer_of_a: Arc<OnceLock<TtlMap<String, String>>> = Arc::new(OnceLock::new());
  let peer_of_b: Arc<OnceLock<TtlMap<String, String>>> = Arc::new(OnceLock::new());

  // Each store's add listener reads from the other store, taking that
  // store's internal locks from inside a notification.
  let probe = |peer: Arc<OnceLock<TtlMap<String, String>>>| {
    move |_value: &String| {
      if let Some(other) = peer.get() {
        other.try_get("probe");
      }
    }
  };

  let map_a = TtlMap::builder()
    .default_ttl(TTL)
    .shards(1)
    .on_add(probe(peer_of_a.clone()))
    .build()
    .unwrap();
  let map_b = TtlMap::builder()
    .default_ttl(TTL)
    .shards(1)
    .on_add(probe(peer_of_b.clone()))
    .build()
    .unwrap();
  peer_of_a.set(map_b.clone()).unwrap();
  peer_of_b.set(map_a.clone()).unwrap();

  let (done_tx, done_rx) = mpsc::channel();
  let mut handles = vec![];
  for (map, tx) in [(map_a, done_tx.clone()), (map_b, done_tx)] {
    handles.push(thread::spawn(move || {
      for i in 0..200 {
        map.insert(format!("key-{i}"), "value".to_string(), None);
      }
      tx.send(()).unwrap();
    }));
  }

  // Both writers must finish in bounded time. A deadlock between the two
  // stores' locks would leave the channel empty.
  for _ in 0..2 {
    done_rx
      .recv_timeout(Duration::from_secs(10))
      .expect("cross-store listener dispatch deadlocked");
  }
  for handle in handles {
    handle.join().unwrap();
  }
}
