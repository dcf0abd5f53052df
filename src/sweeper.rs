//! Periodic background sweeping of expired entries across stores.

use crate::cell::TtlCell;
use crate::list::TtlList;
use crate::map::TtlMap;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// The interval used by the process-wide [`Sweeper::global`] instance.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

static GLOBAL_SWEEPER: Lazy<Sweeper> = Lazy::new(|| {
  let sweeper = Sweeper::new(DEFAULT_SWEEP_INTERVAL);
  sweeper.start();
  sweeper
});

/// The capability a store exposes to be driven by a [`Sweeper`]: evict every
/// currently-expired entry and report how many were removed.
///
/// Implemented by [`TtlMap`], [`TtlCell`] and [`TtlList`]; anything else that
/// reclaims expired state can implement it and register alongside them.
pub trait Sweepable: Send + Sync {
  fn remove_expired(&self) -> usize;
}

/// Drives [`Sweepable::remove_expired`] across a set of registered stores,
/// either on demand via [`collect_all`](Sweeper::collect_all) or periodically
/// from a background worker controlled by [`start`](Sweeper::start) and
/// [`stop`](Sweeper::stop).
///
/// Registrations are weak: a sweeper never keeps a store alive, and a store
/// dropped elsewhere is pruned from the registry on the next sweep. Stores
/// no caller happens to touch are still eventually reclaimed this way, since
/// lazy expiry alone only fires on access.
pub struct Sweeper {
  shared: Arc<SweeperShared>,
  worker: Mutex<Option<SweepWorker>>,
}

struct SweeperShared {
  registry: Mutex<Vec<Weak<dyn Sweepable>>>,
  interval: Mutex<Duration>,
  runs: AtomicU64,
  failures: AtomicU64,
  entries_removed: AtomicU64,
}

struct SweepWorker {
  handle: JoinHandle<()>,
  stop_flag: Arc<AtomicBool>,
}

impl SweeperShared {
  fn collect_all(&self) -> usize {
    // Clone the live registrations out so the stores are swept outside the
    // registry lock; registration can proceed while a sweep is running.
    let targets: Vec<Arc<dyn Sweepable>> = {
      let mut registry = self.registry.lock();
      registry.retain(|weak| weak.strong_count() > 0);
      registry.iter().filter_map(Weak::upgrade).collect()
    };

    let mut removed = 0;
    for store in targets {
      // One store's failing sweep must not abort the rest.
      match panic::catch_unwind(AssertUnwindSafe(|| store.remove_expired())) {
        Ok(count) => removed += count,
        Err(_) => {
          self.failures.fetch_add(1, Ordering::Relaxed);
        }
      }
    }

    self.runs.fetch_add(1, Ordering::Relaxed);
    self
      .entries_removed
      .fetch_add(removed as u64, Ordering::Relaxed);
    removed
  }
}

impl Sweeper {
  /// Creates a sweeper with the given tick interval. The background worker
  /// is not started; call [`start`](Sweeper::start) or sweep on demand with
  /// [`collect_all`](Sweeper::collect_all).
  pub fn new(interval: Duration) -> Self {
    Self {
      shared: Arc::new(SweeperShared {
        registry: Mutex::new(Vec::new()),
        interval: Mutex::new(interval),
        runs: AtomicU64::new(0),
        failures: AtomicU64::new(0),
        entries_removed: AtomicU64::new(0),
      }),
      worker: Mutex::new(None),
    }
  }

  /// The process-wide sweeper: a [`DEFAULT_SWEEP_INTERVAL`] tick, started on
  /// first use. Convenient for applications that want one shared sweeping
  /// thread; stores that need a different cadence create their own
  /// [`Sweeper`].
  pub fn global() -> &'static Sweeper {
    &GLOBAL_SWEEPER
  }

  /// Adds a store to the registered set. Idempotent: re-registering the same
  /// store instance is a no-op. Only a weak reference is kept, so
  /// registration never extends the store's lifetime.
  pub fn register<S>(&self, store: &Arc<S>)
  where
    S: Sweepable + 'static,
  {
    let weak: Weak<dyn Sweepable> = Arc::downgrade(&(Arc::clone(store) as Arc<dyn Sweepable>));
    let mut registry = self.shared.registry.lock();
    if registry.iter().any(|existing| existing.ptr_eq(&weak)) {
      return;
    }
    registry.push(weak);
  }

  /// Removes a store from the registered set. Returns whether it was
  /// registered.
  pub fn unregister<S>(&self, store: &Arc<S>) -> bool
  where
    S: Sweepable + 'static,
  {
    let target: Weak<dyn Sweepable> = Arc::downgrade(&(Arc::clone(store) as Arc<dyn Sweepable>));
    let mut registry = self.shared.registry.lock();
    let before = registry.len();
    registry.retain(|existing| !existing.ptr_eq(&target));
    registry.len() != before
  }

  /// Sweeps every registered store now, on the calling thread, and returns
  /// the total number of entries removed. A store whose sweep panics is
  /// isolated and counted as a failure; the remaining stores are still
  /// swept. Dead registrations are pruned.
  pub fn collect_all(&self) -> usize {
    self.shared.collect_all()
  }

  /// Starts the background worker, which invokes
  /// [`collect_all`](Sweeper::collect_all) once per interval. A no-op if the
  /// worker is already running.
  pub fn start(&self) {
    let mut worker = self.worker.lock();
    if worker.is_some() {
      return;
    }

    let shared = self.shared.clone();
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop = stop_flag.clone();

    let handle = thread::spawn(move || {
      while !stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();
        shared.collect_all();

        // Sleep for the remainder of the tick interval. The interval is
        // re-read every tick so runtime changes take effect.
        let interval = *shared.interval.lock();
        if let Some(remaining) = interval.checked_sub(tick_start.elapsed()) {
          thread::park_timeout(remaining);
        }
      }
    });

    *worker = Some(SweepWorker { handle, stop_flag });
  }

  /// Stops the background worker and joins it. A tick already in progress
  /// runs to completion; no further ticks fire afterwards. A no-op if the
  /// worker is not running.
  pub fn stop(&self) {
    let worker = { self.worker.lock().take() };
    if let Some(worker) = worker {
      worker.stop_flag.store(true, Ordering::Relaxed);
      worker.handle.thread().unpark();
      let _ = worker.handle.join();
    }
  }

  pub fn is_running(&self) -> bool {
    self.worker.lock().is_some()
  }

  pub fn interval(&self) -> Duration {
    *self.shared.interval.lock()
  }

  /// Changes the tick interval. A parked worker is woken so the new interval
  /// applies from the next tick rather than after the old one elapses.
  pub fn set_interval(&self, interval: Duration) {
    *self.shared.interval.lock() = interval;
    if let Some(worker) = &*self.worker.lock() {
      worker.handle.thread().unpark();
    }
  }

  pub fn metrics(&self) -> SweeperMetrics {
    let registered = {
      let registry = self.shared.registry.lock();
      registry.iter().filter(|weak| weak.strong_count() > 0).count()
    };
    SweeperMetrics {
      runs: self.shared.runs.load(Ordering::Relaxed),
      failures: self.shared.failures.load(Ordering::Relaxed),
      entries_removed: self.shared.entries_removed.load(Ordering::Relaxed),
      registered,
    }
  }
}

impl Drop for Sweeper {
  fn drop(&mut self) {
    self.stop();
  }
}

impl fmt::Debug for Sweeper {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sweeper")
      .field("interval", &self.interval())
      .field("running", &self.is_running())
      .finish_non_exhaustive()
  }
}

/// A point-in-time snapshot of a sweeper's activity.
#[derive(Debug, Clone)]
pub struct SweeperMetrics {
  /// The number of sweep passes completed, on-demand and background alike.
  pub runs: u64,
  /// The number of individual store sweeps that panicked.
  pub failures: u64,
  /// The total number of entries removed across all passes.
  pub entries_removed: u64,
  /// The number of currently live registrations.
  pub registered: usize,
}

impl<K, V, H> Sweepable for TtlMap<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  fn remove_expired(&self) -> usize {
    TtlMap::remove_expired(self)
  }
}

impl<V: Send + Sync> Sweepable for TtlCell<V> {
  fn remove_expired(&self) -> usize {
    TtlCell::remove_expired(self)
  }
}

impl<V: Send + Sync> Sweepable for TtlList<V> {
  fn remove_expired(&self) -> usize {
    TtlList::remove_expired(self)
  }
}
