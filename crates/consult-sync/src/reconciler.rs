//! [`Reconciler`] — turns a lossy notification channel into a dependable
//! stream of deliveries.
//!
//! Each subscription runs a pump task that forwards channel events to its
//! handler. When the channel drops, the handler is told its data is stale;
//! when it comes back, the pump re-reads everything the predicate covers from
//! the store (with retry) and hands the handler a full resync. Handlers must
//! therefore merge idempotently: a record can arrive both in a resync and as
//! an event, and events themselves are at-least-once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use uuid::Uuid;

use consult_core::{
  Error, Result,
  case::CaseFilter,
  channel::{ChangeStream, ChannelSignal, NotificationChannel},
  event::{ChangeEvent, EntityKind, Predicate, Record},
  store::RecordStore,
};

use crate::{config::RetryConfig, retry::with_retry};

/// What a subscription handler is handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
  Event(ChangeEvent),
  /// The channel dropped; local data may be missing changes.
  Stale,
  /// The channel is back and this is everything the predicate currently
  /// covers.
  Resync(Vec<Record>),
  /// The channel is back but the catch-up read failed after retries. Data
  /// stays stale.
  ResyncFailed(String),
  /// The channel ended for good. Nothing more will be delivered.
  Closed,
}

type Handler = Box<dyn Fn(Delivery) + Send + Sync>;

struct Slot {
  handler: Mutex<Option<Handler>>,
}

impl Slot {
  fn lock(&self) -> MutexGuard<'_, Option<Handler>> {
    self.handler.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns `false` once the subscription has been released.
  fn deliver(&self, delivery: Delivery) -> bool {
    match self.lock().as_ref() {
      Some(handler) => {
        handler(delivery);
        true
      }
      None => false,
    }
  }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// An active subscription. Releasing or dropping it stops deliveries.
pub struct SubscriptionHandle {
  kind:      EntityKind,
  predicate: Predicate,
  slot:      Arc<Slot>,
  task:      Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
  pub fn kind(&self) -> EntityKind { self.kind }

  pub fn predicate(&self) -> Predicate { self.predicate }

  pub fn is_active(&self) -> bool { self.slot.lock().is_some() }

  /// Stop deliveries. A delivery already in progress finishes first; none
  /// starts after this returns.
  ///
  /// Must not be called from inside this subscription's own handler.
  pub fn release(mut self) { self.release_inner(); }

  fn release_inner(&mut self) {
    let Some(task) = self.task.take() else {
      return;
    };
    self.slot.lock().take();
    task.abort();
    tracing::debug!(kind = %self.kind, predicate = ?self.predicate, "subscription released");
  }
}

impl Drop for SubscriptionHandle {
  fn drop(&mut self) { self.release_inner(); }
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

pub struct Reconciler<S, C> {
  store:   Arc<S>,
  channel: Arc<C>,
  retry:   RetryConfig,
}

impl<S, C> Reconciler<S, C>
where
  S: RecordStore + 'static,
  C: NotificationChannel,
{
  pub fn new(store: Arc<S>, channel: Arc<C>, retry: RetryConfig) -> Self {
    Self { store, channel, retry }
  }

  /// Subscribe `handler` to changes of `kind` records matching `predicate`.
  ///
  /// Must be called inside a tokio runtime.
  pub fn subscribe<F>(&self, kind: EntityKind, predicate: Predicate, handler: F) -> SubscriptionHandle
  where
    F: Fn(Delivery) + Send + Sync + 'static,
  {
    let stream = self.channel.subscribe(kind, predicate);
    let slot = Arc::new(Slot { handler: Mutex::new(Some(Box::new(handler))) });
    let task = tokio::spawn(pump(
      stream,
      Arc::clone(&self.store),
      kind,
      predicate,
      self.retry.clone(),
      Arc::clone(&slot),
    ));
    tracing::debug!(%kind, ?predicate, "subscription opened");
    SubscriptionHandle { kind, predicate, slot, task: Some(task) }
  }

  /// Same as [`SubscriptionHandle::release`].
  pub fn release(&self, handle: SubscriptionHandle) { handle.release(); }
}

async fn pump<S, St>(
  mut stream: St,
  store: Arc<S>,
  kind: EntityKind,
  predicate: Predicate,
  retry: RetryConfig,
  slot: Arc<Slot>,
) where
  S: RecordStore,
  St: ChangeStream,
{
  while let Some(signal) = stream.next_signal().await {
    let delivery = match signal {
      ChannelSignal::Event(event) => Delivery::Event(event),
      ChannelSignal::Disconnected => {
        tracing::warn!(%kind, ?predicate, "channel disconnected; marking stale");
        Delivery::Stale
      }
      ChannelSignal::Reconnected => {
        match fetch_with_retry(&*store, kind, predicate, &retry).await {
          Ok(records) => {
            tracing::info!(%kind, ?predicate, records = records.len(), "resynced after reconnect");
            Delivery::Resync(records)
          }
          Err(e) => {
            tracing::error!(%kind, ?predicate, error = %e, "resync failed");
            Delivery::ResyncFailed(e.to_string())
          }
        }
      }
    };
    if !slot.deliver(delivery) {
      return;
    }
  }

  tracing::warn!(%kind, ?predicate, error = %Error::ChannelDisconnect, "channel closed");
  slot.deliver(Delivery::Closed);
}

pub(crate) async fn fetch_with_retry<S: RecordStore>(
  store: &S,
  kind: EntityKind,
  predicate: Predicate,
  retry: &RetryConfig,
) -> Result<Vec<Record>> {
  with_retry(retry, "resync read", || fetch(store, kind, predicate)).await
}

async fn fetch<S: RecordStore>(
  store: &S,
  kind: EntityKind,
  predicate: Predicate,
) -> Result<Vec<Record>> {
  match (kind, predicate) {
    (EntityKind::Case, Predicate::Id(id) | Predicate::CaseId(id)) => Ok(
      store
        .get_case(id)
        .await
        .map_err(Error::store)?
        .map(Record::Case)
        .into_iter()
        .collect(),
    ),
    (EntityKind::Case, Predicate::All) => Ok(
      all_cases(store)
        .await?
        .into_iter()
        .map(Record::Case)
        .collect(),
    ),
    (EntityKind::Message, Predicate::Id(id)) => Ok(
      store
        .get_message(id)
        .await
        .map_err(Error::store)?
        .map(Record::Message)
        .into_iter()
        .collect(),
    ),
    (EntityKind::Message, Predicate::CaseId(case_id)) => thread(store, case_id).await,
    (EntityKind::Message, Predicate::All) => {
      let mut records = Vec::new();
      for case in all_cases(store).await? {
        records.extend(thread(store, case.id).await?);
      }
      Ok(records)
    }
  }
}

async fn all_cases<S: RecordStore>(store: &S) -> Result<Vec<consult_core::case::Case>> {
  let filter = CaseFilter::default();
  store.list_cases(&filter).await.map_err(Error::store)
}

async fn thread<S: RecordStore>(store: &S, case_id: Uuid) -> Result<Vec<Record>> {
  Ok(
    store
      .list_messages(case_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(Record::Message)
      .collect(),
  )
}
