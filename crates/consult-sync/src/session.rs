//! [`CaseSession`] — one client's live, locally cached view of a case.
//!
//! A session holds two subscriptions (the case record and its message
//! thread) and folds every delivery into a [`CaseView`]: the case by
//! last-writer-wins on `(version, updated_at)`, messages by insert-if-absent
//! on their id. Duplicates, redeliveries and resyncs therefore converge on
//! the stored state. Observers follow the view through [`CaseSession::watch`].

use std::{
  collections::HashSet,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;
use uuid::Uuid;

use consult_core::{
  Error, Result,
  actor::SessionContext,
  case::{Case, CaseStatus},
  channel::NotificationChannel,
  event::{EntityKind, Predicate, Record},
  message::{Message, MessageLog},
  store::RecordStore,
};

use crate::{
  Consult,
  config::RetryConfig,
  machine::CaseMachine,
  reconciler::{Delivery, SubscriptionHandle, fetch_with_retry},
  thread::{ThreadManager, ThreadObserver},
};

/// A snapshot of what the session currently knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseView {
  pub case:      Option<Case>,
  /// Ascending by `(timestamp, id)`, each message once.
  pub messages:  Vec<Message>,
  /// A load from the store is in flight.
  pub loading:   bool,
  /// The channel dropped and not everything has been resynced yet.
  pub stale:     bool,
  pub error:     Option<String>,
  /// A synthetic reply is pending.
  pub composing: bool,
}

impl CaseView {
  pub fn status(&self) -> Option<CaseStatus> { self.case.as_ref().map(|c| c.status) }

  pub fn is_closed(&self) -> bool { self.status().is_some_and(CaseStatus::is_terminal) }
}

// ─── View cell ───────────────────────────────────────────────────────────────

struct ViewState {
  case:         Option<Case>,
  log:          MessageLog,
  loading:      bool,
  stale:        HashSet<EntityKind>,
  /// Kinds whose subscription is cut off from the channel. Only a delivery
  /// after reconnect takes a kind out of here.
  disconnected: HashSet<EntityKind>,
  /// The channel ended for good.
  closed:       bool,
  error:        Option<String>,
  composing:    bool,
}

impl ViewState {
  fn snapshot(&self) -> CaseView {
    CaseView {
      case:      self.case.clone(),
      messages:  self.log.to_vec(),
      loading:   self.loading,
      stale:     !self.stale.is_empty(),
      error:     self.error.clone(),
      composing: self.composing,
    }
  }

  fn merge_case(&mut self, incoming: Case) -> bool {
    match &self.case {
      Some(current) if !incoming.supersedes(current) => false,
      _ => {
        self.case = Some(incoming);
        true
      }
    }
  }
}

pub(crate) struct ViewCell {
  case_id: Uuid,
  state:   Mutex<ViewState>,
  tx:      watch::Sender<CaseView>,
}

impl ViewCell {
  fn new(case_id: Uuid) -> Self {
    let state = ViewState {
      case:         None,
      log:          MessageLog::new(),
      loading:      true,
      stale:        HashSet::new(),
      disconnected: HashSet::new(),
      closed:       false,
      error:        None,
      composing:    false,
    };
    let (tx, _) = watch::channel(state.snapshot());
    Self { case_id, state: Mutex::new(state), tx }
  }

  fn lock(&self) -> MutexGuard<'_, ViewState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Apply `f` and publish a new snapshot if it reports a change.
  fn modify<R>(&self, f: impl FnOnce(&mut ViewState) -> (bool, R)) -> R {
    let mut state = self.lock();
    let (changed, out) = f(&mut state);
    if changed {
      self.tx.send_replace(state.snapshot());
    }
    out
  }

  fn merge_case(&self, case: Case) -> bool {
    if case.id != self.case_id {
      return false;
    }
    self.modify(|st| {
      let changed = st.merge_case(case);
      (changed, changed)
    })
  }

  fn merge_message(&self, message: Message) -> bool {
    if message.case_id != self.case_id {
      return false;
    }
    self.modify(|st| {
      let changed = st.log.insert(message);
      (changed, changed)
    })
  }

  fn disconnected(&self, kind: EntityKind) {
    self.modify(|st| {
      st.disconnected.insert(kind);
      (st.stale.insert(kind), ())
    });
  }

  /// The channel is gone; `kind` stays stale for the rest of the session.
  fn channel_closed(&self, kind: EntityKind) {
    self.modify(|st| {
      st.disconnected.insert(kind);
      st.stale.insert(kind);
      st.closed = true;
      st.error = Some(Error::ChannelDisconnect.to_string());
      (true, ())
    });
  }

  /// The channel is back but the catch-up read of `kind` failed. The kind
  /// stays stale until a resync or a successful refresh.
  fn resync_failed(&self, kind: EntityKind, reason: String) {
    self.modify(|st| {
      st.disconnected.remove(&kind);
      st.error = Some(reason);
      (true, ())
    });
  }

  /// Fold in a resync of `kind`. Returns the messages that were new.
  fn resync(&self, kind: EntityKind, records: Vec<Record>) -> Vec<Message> {
    self.modify(|st| {
      let mut fresh = Vec::new();
      for record in records {
        match record {
          Record::Case(case) if case.id == self.case_id => {
            st.merge_case(case);
          }
          Record::Message(message) if message.case_id == self.case_id => {
            if st.log.insert(message.clone()) {
              fresh.push(message);
            }
          }
          _ => {}
        }
      }
      st.disconnected.remove(&kind);
      st.stale.remove(&kind);
      if !st.closed {
        st.error = None;
      }
      (true, fresh)
    })
  }

  fn loading(&self) {
    self.modify(|st| (!std::mem::replace(&mut st.loading, true), ()));
  }

  /// Fold in a full read from the store. Kinds still cut off from the
  /// channel stay stale: the read says nothing about what happens next.
  fn loaded(&self, case: Case, messages: Vec<Message>) {
    self.modify(|st| {
      st.merge_case(case);
      st.log.extend(messages);
      st.loading = false;
      let disconnected = &st.disconnected;
      st.stale.retain(|kind| disconnected.contains(kind));
      if !st.closed {
        st.error = None;
      }
      (true, ())
    });
  }

  fn fail(&self, reason: String) {
    self.modify(|st| {
      st.loading = false;
      st.error = Some(reason);
      (true, ())
    });
  }

  fn is_closed(&self) -> bool {
    self
      .lock()
      .case
      .as_ref()
      .is_some_and(|c| c.status.is_terminal())
  }
}

impl ThreadObserver for ViewCell {
  fn message_appended(&self, message: &Message) { self.merge_message(message.clone()); }

  fn composing_changed(&self, case_id: Uuid, composing: bool) {
    if case_id != self.case_id {
      return;
    }
    self.modify(|st| {
      let changed = st.composing != composing;
      st.composing = composing;
      (changed, ())
    });
  }
}

fn on_case<S>(view: &ViewCell, threads: &ThreadManager<S>, delivery: Delivery) {
  match delivery {
    Delivery::Event(event) => {
      if let Record::Case(case) = event.record {
        view.merge_case(case);
      }
    }
    Delivery::Stale => view.disconnected(EntityKind::Case),
    Delivery::Closed => view.channel_closed(EntityKind::Case),
    Delivery::Resync(records) => {
      view.resync(EntityKind::Case, records);
    }
    Delivery::ResyncFailed(reason) => view.resync_failed(EntityKind::Case, reason),
  }
  if view.is_closed() {
    threads.cancel(view.case_id);
  }
}

fn on_messages<S>(view: &ViewCell, threads: &ThreadManager<S>, delivery: Delivery) {
  match delivery {
    Delivery::Event(event) => {
      if let Record::Message(message) = event.record {
        if view.merge_message(message.clone()) {
          threads.observe_remote(&message);
        }
      }
    }
    Delivery::Stale => view.disconnected(EntityKind::Message),
    Delivery::Closed => view.channel_closed(EntityKind::Message),
    Delivery::Resync(records) => {
      for message in view.resync(EntityKind::Message, records) {
        threads.observe_remote(&message);
      }
    }
    Delivery::ResyncFailed(reason) => view.resync_failed(EntityKind::Message, reason),
  }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// A live view of one case, scoped to one client.
///
/// Dropping the session releases its subscriptions and cancels its pending
/// synthetic replies.
pub struct CaseSession<S> {
  ctx:           SessionContext,
  case_id:       Uuid,
  view:          Arc<ViewCell>,
  store:         Arc<S>,
  machine:       Arc<CaseMachine<S>>,
  threads:       ThreadManager<S>,
  retry:         RetryConfig,
  subscriptions: Vec<SubscriptionHandle>,
}

impl<S: RecordStore + 'static> CaseSession<S> {
  pub(crate) async fn open<C>(
    consult: &Consult<S, C>,
    ctx: SessionContext,
    case_id: Uuid,
  ) -> Result<Self>
  where
    C: NotificationChannel,
  {
    ctx.actor.ensure_can_access(case_id)?;

    let view = Arc::new(ViewCell::new(case_id));
    let observer: Arc<dyn ThreadObserver> = view.clone();
    let threads = ThreadManager::new(
      Arc::clone(&consult.store),
      Arc::clone(&consult.clock),
      Arc::clone(&consult.random),
      consult.config.responder.clone(),
      Some(observer),
    );

    let case_sub = consult.reconciler.subscribe(EntityKind::Case, Predicate::Id(case_id), {
      let view = Arc::clone(&view);
      let threads = threads.clone();
      move |delivery| on_case(&view, &threads, delivery)
    });
    let thread_sub =
      consult
        .reconciler
        .subscribe(EntityKind::Message, Predicate::CaseId(case_id), {
          let view = Arc::clone(&view);
          let threads = threads.clone();
          move |delivery| on_messages(&view, &threads, delivery)
        });

    let session = Self {
      ctx,
      case_id,
      view,
      store: Arc::clone(&consult.store),
      machine: Arc::clone(&consult.machine),
      threads,
      retry: consult.config.retry.clone(),
      subscriptions: vec![case_sub, thread_sub],
    };

    match session.load().await {
      Ok(()) => {}
      Err(e @ Error::CaseNotFound(_)) => return Err(e),
      Err(e) => {
        tracing::warn!(%case_id, error = %e, "initial load failed");
        session.view.fail(e.to_string());
      }
    }
    tracing::debug!(%case_id, session = %session.ctx.session_id, "case session opened");
    Ok(session)
  }

  async fn load(&self) -> Result<()> {
    let case = fetch_with_retry(
      &*self.store,
      EntityKind::Case,
      Predicate::Id(self.case_id),
      &self.retry,
    )
    .await?
    .into_iter()
    .find_map(|record| match record {
      Record::Case(case) => Some(case),
      Record::Message(_) => None,
    })
    .ok_or(Error::CaseNotFound(self.case_id))?;

    let messages = fetch_with_retry(
      &*self.store,
      EntityKind::Message,
      Predicate::CaseId(self.case_id),
      &self.retry,
    )
    .await?
    .into_iter()
    .filter_map(|record| match record {
      Record::Message(message) => Some(message),
      Record::Case(_) => None,
    })
    .collect();

    self.view.loaded(case, messages);
    Ok(())
  }

  /// Re-read the case and its thread from the store.
  ///
  /// Success clears the error, and the stale flag of every kind whose
  /// subscription is still connected. A view cut off from the channel stays
  /// stale until the reconnect resync.
  pub async fn refresh(&self) -> Result<()> {
    self.view.loading();
    self.load().await.inspect_err(|e| self.view.fail(e.to_string()))
  }

  /// Send a message as this session's actor. Blank text is ignored.
  pub async fn send(&self, text: &str) -> Result<Option<Message>> {
    self.threads.send(&self.ctx, self.case_id, text).await
  }

  /// Move the case to `target`. Closing cancels pending synthetic replies.
  pub async fn transition(&self, target: CaseStatus) -> Result<Case> {
    let case = self.machine.transition(&self.ctx, self.case_id, target).await?;
    self.view.merge_case(case.clone());
    if case.status.is_terminal() {
      self.threads.cancel(self.case_id);
    }
    Ok(case)
  }

  /// Release the subscriptions and cancel pending replies.
  pub fn close(self) {}
}

impl<S> CaseSession<S> {
  pub fn case_id(&self) -> Uuid { self.case_id }

  pub fn context(&self) -> &SessionContext { &self.ctx }

  pub fn view(&self) -> CaseView { self.view.tx.borrow().clone() }

  /// Follow view changes.
  pub fn watch(&self) -> watch::Receiver<CaseView> { self.view.tx.subscribe() }

  pub fn is_composing(&self) -> bool { self.threads.is_composing(self.case_id) }
}

impl<S> Drop for CaseSession<S> {
  fn drop(&mut self) {
    self.threads.shutdown();
    self.subscriptions.clear();
    tracing::debug!(case_id = %self.case_id, "case session closed");
  }
}
