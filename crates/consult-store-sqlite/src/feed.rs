//! [`ChangeFeed`] — the in-process notification channel of [`SqliteStore`].
//!
//! Every committed write is fanned out to the subscribers whose kind and
//! predicate match it. The feed can be interrupted and restored to model a
//! dropped connection: subscribers see `Disconnected`, anything published in
//! the gap is lost, and `Reconnected` follows on restore.
//!
//! [`SqliteStore`]: crate::SqliteStore

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use consult_core::{
  channel::{ChangeStream, ChannelSignal},
  event::{ChangeEvent, EntityKind, Operation, Predicate, Record},
};
use tokio::sync::mpsc;

struct Subscriber {
  kind:      EntityKind,
  predicate: Predicate,
  tx:        mpsc::UnboundedSender<ChannelSignal>,
}

struct FeedState {
  connected:   bool,
  subscribers: Vec<Subscriber>,
}

/// Fan-out of committed changes. Cloning is cheap and shares the feed.
#[derive(Clone)]
pub struct ChangeFeed {
  state: Arc<Mutex<FeedState>>,
}

impl Default for ChangeFeed {
  fn default() -> Self { Self::new() }
}

impl ChangeFeed {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(FeedState {
        connected:   true,
        subscribers: Vec::new(),
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, FeedState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Open a subscription. A subscriber joining while the feed is interrupted
  /// is told so immediately.
  pub fn subscribe(&self, kind: EntityKind, predicate: Predicate) -> FeedStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = self.lock();
    if !state.connected {
      let _ = tx.send(ChannelSignal::Disconnected);
    }
    state.subscribers.push(Subscriber { kind, predicate, tx });
    FeedStream { rx }
  }

  /// Deliver a change to every matching subscriber.
  ///
  /// Publishing is also how callers inject redelivery: the feed makes no
  /// attempt to suppress duplicates.
  pub fn publish(&self, operation: Operation, record: Record) {
    let mut state = self.lock();
    if !state.connected {
      tracing::debug!(id = %record.id(), "feed interrupted; dropping change");
      return;
    }
    state.subscribers.retain(|sub| {
      if sub.kind != record.kind() || !sub.predicate.matches(&record) {
        return !sub.tx.is_closed();
      }
      sub
        .tx
        .send(ChannelSignal::Event(ChangeEvent {
          operation,
          record: record.clone(),
          predicate: sub.predicate,
        }))
        .is_ok()
    });
  }

  /// Drop the connection: subscribers are told, and changes are discarded
  /// until [`restore`](Self::restore).
  pub fn interrupt(&self) {
    let mut state = self.lock();
    if !state.connected {
      return;
    }
    state.connected = false;
    tracing::info!("change feed interrupted");
    state
      .subscribers
      .retain(|sub| sub.tx.send(ChannelSignal::Disconnected).is_ok());
  }

  pub fn restore(&self) {
    let mut state = self.lock();
    if state.connected {
      return;
    }
    state.connected = true;
    tracing::info!("change feed restored");
    state
      .subscribers
      .retain(|sub| sub.tx.send(ChannelSignal::Reconnected).is_ok());
  }

  pub fn is_connected(&self) -> bool { self.lock().connected }

  /// Number of subscriptions whose stream is still alive.
  pub fn subscriber_count(&self) -> usize {
    let mut state = self.lock();
    state.subscribers.retain(|sub| !sub.tx.is_closed());
    state.subscribers.len()
  }
}

/// The receiving end of a feed subscription. Dropping it unsubscribes.
pub struct FeedStream {
  rx: mpsc::UnboundedReceiver<ChannelSignal>,
}

impl ChangeStream for FeedStream {
  async fn next_signal(&mut self) -> Option<ChannelSignal> { self.rx.recv().await }
}
