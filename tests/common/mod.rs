#![allow(dead_code)]

use lapse::{CacheListener, EvictionReason, TtlMap};

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// A lifecycle notification captured by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  Add(String),
  Remove(String, EvictionReason),
}

/// A listener that forwards every notification over a channel, so tests can
/// assert on exact event sequences.
pub struct RecordingListener {
  sender: Sender<Event>,
}

impl CacheListener<String> for RecordingListener {
  fn on_add(&self, value: &String) {
    self.sender.send(Event::Add(value.clone())).unwrap();
  }

  fn on_remove(&self, value: &String, reason: EvictionReason) {
    self
      .sender
      .send(Event::Remove(value.clone(), reason))
      .unwrap();
  }
}

pub fn recording_listener() -> (RecordingListener, Receiver<Event>) {
  let (tx, rx) = mpsc::channel();
  (RecordingListener { sender: tx }, rx)
}

/// Collects every event delivered so far without blocking.
pub fn drain(rx: &Receiver<Event>) -> Vec<Event> {
  rx.try_iter().collect()
}

pub fn build_map(default_ttl: Duration) -> TtlMap<String, String> {
  TtlMap::builder().default_ttl(default_ttl).build().unwrap()
}
