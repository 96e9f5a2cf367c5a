//! [`CaseBoard`] — a clinician's live list of every case.

use std::{
  collections::HashMap,
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
  store::RecordStore,
};

use crate::{
  Consult,
  config::RetryConfig,
  reconciler::{Delivery, SubscriptionHandle, fetch_with_retry},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardView {
  /// Newest first.
  pub cases:   Vec<Case>,
  pub loading: bool,
  pub stale:   bool,
  pub error:   Option<String>,
}

impl BoardView {
  /// Cases still waiting for a responder, newest first.
  pub fn waiting(&self) -> impl Iterator<Item = &Case> {
    self.cases.iter().filter(|c| c.status == CaseStatus::Waiting)
  }

  pub fn get(&self, case_id: Uuid) -> Option<&Case> {
    self.cases.iter().find(|c| c.id == case_id)
  }
}

struct BoardState {
  cases:        HashMap<Uuid, Case>,
  loading:      bool,
  stale:        bool,
  /// Cut off from the channel until the reconnect resync.
  disconnected: bool,
  closed:       bool,
  error:        Option<String>,
}

impl BoardState {
  fn snapshot(&self) -> BoardView {
    let mut cases: Vec<Case> = self.cases.values().cloned().collect();
    cases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    BoardView {
      cases,
      loading: self.loading,
      stale: self.stale,
      error: self.error.clone(),
    }
  }

  fn merge(&mut self, incoming: Case) -> bool {
    match self.cases.get(&incoming.id) {
      Some(current) if !incoming.supersedes(current) => false,
      _ => {
        self.cases.insert(incoming.id, incoming);
        true
      }
    }
  }

  fn merge_records(&mut self, records: Vec<Record>) {
    for record in records {
      if let Record::Case(case) = record {
        self.merge(case);
      }
    }
  }
}

struct BoardCell {
  state: Mutex<BoardState>,
  tx:    watch::Sender<BoardView>,
}

impl BoardCell {
  fn lock(&self) -> MutexGuard<'_, BoardState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn apply(&self, delivery: Delivery) {
    let mut state = self.lock();
    let changed = match delivery {
      Delivery::Event(event) => match event.record {
        Record::Case(case) => state.merge(case),
        Record::Message(_) => false,
      },
      Delivery::Stale => {
        state.disconnected = true;
        !std::mem::replace(&mut state.stale, true)
      }
      Delivery::Closed => {
        state.disconnected = true;
        state.stale = true;
        state.closed = true;
        state.error = Some(Error::ChannelDisconnect.to_string());
        true
      }
      Delivery::Resync(records) => {
        state.merge_records(records);
        state.disconnected = false;
        state.stale = false;
        if !state.closed {
          state.error = None;
        }
        true
      }
      Delivery::ResyncFailed(reason) => {
        state.disconnected = false;
        state.error = Some(reason);
        true
      }
    };
    if changed {
      self.tx.send_replace(state.snapshot());
    }
  }

  fn loading(&self) {
    let mut state = self.lock();
    if !std::mem::replace(&mut state.loading, true) {
      self.tx.send_replace(state.snapshot());
    }
  }

  /// A full read only clears `stale` while the channel is connected.
  fn loaded(&self, records: Vec<Record>) {
    let mut state = self.lock();
    state.merge_records(records);
    state.loading = false;
    state.stale = state.disconnected;
    if !state.closed {
      state.error = None;
    }
    self.tx.send_replace(state.snapshot());
  }

  fn fail(&self, reason: String) {
    let mut state = self.lock();
    state.loading = false;
    state.error = Some(reason);
    self.tx.send_replace(state.snapshot());
  }
}

/// Live, converging view of all cases for a clinician.
pub struct CaseBoard<S> {
  ctx:           SessionContext,
  cell:          Arc<BoardCell>,
  store:         Arc<S>,
  retry:         RetryConfig,
  _subscription: SubscriptionHandle,
}

impl<S: RecordStore + 'static> CaseBoard<S> {
  pub(crate) async fn open<C>(consult: &Consult<S, C>, ctx: SessionContext) -> Result<Self>
  where
    C: NotificationChannel,
  {
    if !ctx.actor.is_clinician() {
      return Err(Error::Unauthorized {
        role:   ctx.actor.role(),
        action: "view the case board",
      });
    }

    let initial = BoardState {
      cases:        HashMap::new(),
      loading:      true,
      stale:        false,
      disconnected: false,
      closed:       false,
      error:        None,
    };
    let (tx, _) = watch::channel(initial.snapshot());
    let cell = Arc::new(BoardCell { state: Mutex::new(initial), tx });

    let subscription = consult.reconciler.subscribe(EntityKind::Case, Predicate::All, {
      let cell = Arc::clone(&cell);
      move |delivery| cell.apply(delivery)
    });

    let board = Self {
      ctx,
      cell,
      store: Arc::clone(&consult.store),
      retry: consult.config.retry.clone(),
      _subscription: subscription,
    };
    if let Err(e) = board.refresh().await {
      tracing::warn!(error = %e, "initial board load failed");
    }
    Ok(board)
  }

  /// Re-read every case from the store.
  pub async fn refresh(&self) -> Result<()> {
    self.cell.loading();
    match fetch_with_retry(&*self.store, EntityKind::Case, Predicate::All, &self.retry).await {
      Ok(records) => {
        self.cell.loaded(records);
        Ok(())
      }
      Err(e) => {
        self.cell.fail(e.to_string());
        Err(e)
      }
    }
  }
}

impl<S> CaseBoard<S> {
  pub fn context(&self) -> &SessionContext { &self.ctx }

  pub fn view(&self) -> BoardView { self.cell.tx.borrow().clone() }

  pub fn watch(&self) -> watch::Receiver<BoardView> { self.cell.tx.subscribe() }
}
