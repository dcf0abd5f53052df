use crate::error::FactoryError;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

/// Represents a waiter attached to a `Flight`.
pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

/// The internal state of a value being computed.
pub(crate) enum FlightState<V> {
  Pending,
  Done(Arc<V>),
  Failed(FactoryError),
}

struct Inner<V> {
  state: FlightState<V>,
  waiters: VecDeque<Waiter>,
}

/// A computation shared by every caller racing on the same key.
///
/// The first caller to publish a `Flight` runs the factory; everyone else
/// attaches to it. It can be awaited by sync threads and async tasks
/// simultaneously, and resolves exactly once, to a value or a failure.
pub(crate) struct Flight<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> Flight<V> {
  /// Creates a new `Flight` in the pending state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: FlightState::Pending,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Resolves the flight with a value, waking all waiters. A no-op if the
  /// flight already resolved.
  pub(crate) fn complete(&self, value: Arc<V>) {
    let mut inner = self.inner.lock();
    if !matches!(inner.state, FlightState::Pending) {
      return;
    }
    inner.state = FlightState::Done(value);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }

  /// Resolves the flight with a failure, waking all waiters. A no-op if the
  /// flight already resolved.
  pub(crate) fn fail(&self, error: FactoryError) {
    let mut inner = self.inner.lock();
    if !matches!(inner.state, FlightState::Pending) {
      return;
    }
    inner.state = FlightState::Failed(error);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }

  pub(crate) fn is_pending(&self) -> bool {
    matches!(self.inner.lock().state, FlightState::Pending)
  }

  /// Blocks the calling thread until the flight resolves.
  pub(crate) fn wait(&self) -> Result<Arc<V>, FactoryError> {
    loop {
      {
        let mut inner = self.inner.lock();
        match &inner.state {
          FlightState::Done(value) => return Ok(value.clone()),
          FlightState::Failed(error) => return Err(error.clone()),
          FlightState::Pending => {
            inner.waiters.push_back(Waiter::Sync(thread::current()));
          }
        }
      }
      // Parking can wake spuriously; the loop re-checks the state.
      thread::park();
    }
  }
}

impl<V> Future for &Flight<V> {
  type Output = Result<Arc<V>, FactoryError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      FlightState::Done(value) => Poll::Ready(Ok(value.clone())),
      FlightState::Failed(error) => Poll::Ready(Err(error.clone())),
      FlightState::Pending => {
        inner.waiters.push_back(Waiter::Async(cx.waker().clone()));
        Poll::Pending
      }
    }
  }
}

/// How a caller relates to the single-flight registry for its key: a live
/// value was found on the re-check, an existing flight was joined, or a new
/// flight was published and the caller must run the factory.
pub(crate) enum FlightAttempt<V> {
  Hit(Arc<V>),
  Join(Arc<Flight<V>>),
  Lead(Arc<Flight<V>>),
}
