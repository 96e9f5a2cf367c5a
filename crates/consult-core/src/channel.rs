//! The `NotificationChannel` trait — the store's change feed.
//!
//! Delivery is at-least-once per entity. Order is only guaranteed within one
//! entity's stream on one connection. A channel may drop and come back; it
//! reports that with [`ChannelSignal::Disconnected`] and
//! [`ChannelSignal::Reconnected`], and events committed in between may be
//! lost.

use std::future::Future;

use crate::event::{ChangeEvent, EntityKind, Predicate};

/// One item on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
  Event(ChangeEvent),
  Disconnected,
  Reconnected,
}

/// The receiving end of one channel subscription.
///
/// Dropping the stream unsubscribes; no signal is observable afterwards.
pub trait ChangeStream: Send + 'static {
  /// Wait for the next signal. `None` means the channel is gone for good.
  fn next_signal(&mut self) -> impl Future<Output = Option<ChannelSignal>> + Send + '_;
}

pub trait NotificationChannel: Send + Sync {
  type Stream: ChangeStream;

  /// Open a subscription for changes to `kind` records matching `predicate`.
  fn subscribe(&self, kind: EntityKind, predicate: Predicate) -> Self::Stream;
}
