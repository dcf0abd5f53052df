mod common;

use common::build_map;
use lapse::CacheError;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

#[test]
fn test_get_or_add_basic() {
  let map = build_map(TTL);
  let factory_calls = Arc::new(AtomicUsize::new(0));

  // 1. First call on a missing key runs the factory.
  let value = map
    .get_or_add("key".to_string(), None, {
      let factory_calls = factory_calls.clone();
      move |key: &String| {
        factory_calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, io::Error>(format!("computed-{key}"))
      }
    })
    .unwrap();
  assert_eq!(*value, "computed-key");
  assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
  assert_eq!(map.metrics().inserts, 1);

  // 2. Second call is a hit and must not run the factory again.
  let value = map
    .get_or_add("key".to_string(), None, {
      let factory_calls = factory_calls.clone();
      move |key: &String| {
        factory_calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, io::Error>(format!("recomputed-{key}"))
      }
    })
    .unwrap();
  assert_eq!(*value, "computed-key");
  assert_eq!(
    factory_calls.load(Ordering::SeqCst),
    1,
    "factory should not be called again"
  );
}

#[test]
fn test_get_or_add_skips_factory_for_live_value() {
  let map = build_map(TTL);

  map.insert("key".to_string(), "present".to_string(), None);
  let value = map
    .get_or_add("key".to_string(), None, |_key: &String| -> Result<String, io::Error> {
      panic!("factory must not run for a live value")
    })
    .unwrap();
  assert_eq!(*value, "present");
}

#[test]
fn test_get_or_add_thundering_herd() {
  let map = Arc::new(build_map(TTL));
  let factory_calls = Arc::new(AtomicUsize::new(0));
  let num_threads = 20;

  let barrier = Arc::new(Barrier::new(num_threads));
  let (tx, rx) = mpsc::channel();

  let mut handles = vec![];
  for _ in 0..num_threads {
    let map = map.clone();
    let factory_calls = factory_calls.clone();
    let barrier = barrier.clone();
    let tx = tx.clone();
    handles.push(thread::spawn(move || {
      barrier.wait();
      // All threads request the same missing key at once.
      let value = map
        .get_or_add("key".to_string(), None, {
          let factory_calls = factory_calls.clone();
          move |_key: &String| {
            // Simulate a slow computation so the herd piles up.
            thread::sleep(Duration::from_millis(100));
            factory_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>("expensive".to_string())
          }
        })
        .unwrap();
      tx.send(value).unwrap();
    }));
  }
  drop(tx);

  let values = rx.iter().collect::<Vec<_>>();
  for handle in handles {
    handle.join().unwrap();
  }

  assert_eq!(
    factory_calls.load(Ordering::SeqCst),
    1,
    "single-flight failed: factory ran more than once"
  );
  assert_eq!(values.len(), num_threads);
  // Every caller got the identical allocation, not merely an equal value.
  assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
  assert_eq!(map.len(), 1);
}

#[test]
fn test_factory_failure_reaches_every_waiter_and_clears_the_flight() {
  let map = Arc::new(build_map(TTL));
  let factory_calls = Arc::new(AtomicUsize::new(0));
  let num_threads = 8;

  let barrier = Arc::new(Barrier::new(num_threads));
  let mut handles = vec![];
  for _ in 0..num_threads {
    let map = map.clone();
    let factory_calls = factory_calls.clone();
    let barrier = barrier.clone();
    handles.push(thread::spawn(move || {
      barrier.wait();
      map.get_or_add("key".to_string(), None, {
        let factory_calls = factory_calls.clone();
        move |_key: &String| {
          thread::sleep(Duration::from_millis(50));
          factory_calls.fetch_add(1, Ordering::SeqCst);
          Err::<String, _>(io::Error::new(io::ErrorKind::Other, "backend down"))
        }
      })
    }));
  }

  for handle in handles {
    let result = handle.join().unwrap();
    assert!(matches!(result, Err(CacheError::Factory(_))));
  }

  assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
  assert_eq!(map.len(), 0, "a failed computation must install nothing");
  assert_eq!(map.metrics().factory_failures, 1);

  // The in-flight marker was cleared, so a later call retries from scratch.
  let value = map
    .get_or_add("key".to_string(), None, |_key: &String| {
      Ok::<_, io::Error>("second try".to_string())
    })
    .unwrap();
  assert_eq!(*value, "second try");
  assert_eq!(map.len(), 1);
}

#[test]
fn test_get_or_add_with_forwards_argument_to_the_executor_only() {
  let map = build_map(TTL);
  let factory_calls = Arc::new(AtomicUsize::new(0));

  let value = map
    .get_or_add_with("key".to_string(), None, 7usize, {
      let factory_calls = factory_calls.clone();
      move |key: &String, multiplier: usize| {
        factory_calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, io::Error>(format!("{key}-{}", multiplier * 6))
      }
    })
    .unwrap();
  assert_eq!(*value, "key-42");

  // The live value short-circuits; the second argument is dropped unused.
  map
    .get_or_add_with("key".to_string(), None, 1000usize, {
      let factory_calls = factory_calls.clone();
      move |key: &String, multiplier: usize| {
        factory_calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, io::Error>(format!("{key}-{multiplier}"))
      }
    })
    .unwrap();
  assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_factory_clears_the_flight() {
  let map = build_map(TTL);

  let result = panic::catch_unwind(AssertUnwindSafe(|| {
    map.get_or_add("key".to_string(), None, |_key: &String| -> Result<String, io::Error> {
      panic!("factory blew up");
    })
  }));
  assert!(result.is_err(), "the panic propagates to the executing caller");
  assert_eq!(map.len(), 0);

  // The marker was retracted on the unwind path; a fresh call succeeds.
  let value = map
    .get_or_add("key".to_string(), None, |_key: &String| {
      Ok::<_, io::Error>("recovered".to_string())
    })
    .unwrap();
  assert_eq!(*value, "recovered");
}

#[test]
fn test_expired_value_is_recomputed() {
  let map = build_map(TTL);
  let factory_calls = Arc::new(AtomicUsize::new(0));

  let factory = |calls: Arc<AtomicUsize>| {
    move |_key: &String| {
      let generation = calls.fetch_add(1, Ordering::SeqCst);
      Ok::<_, io::Error>(format!("generation-{generation}"))
    }
  };

  let value = map
    .get_or_add(
      "key".to_string(),
      Some(Duration::from_millis(10)),
      factory(factory_calls.clone()),
    )
    .unwrap();
  assert_eq!(*value, "generation-0");

  thread::sleep(Duration::from_millis(50));

  let value = map
    .get_or_add("key".to_string(), None, factory(factory_calls.clone()))
    .unwrap();
  assert_eq!(*value, "generation-1");
  assert_eq!(factory_calls.load(Ordering::SeqCst), 2);
}
