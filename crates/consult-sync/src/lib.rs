//! The Consult synchronization core.
//!
//! [`Consult`] wires a [`RecordStore`] and a [`NotificationChannel`] into
//! the operations a client performs: submitting intake cases, moving them
//! through their lifecycle, exchanging messages, and holding live
//! [`CaseSession`]s and [`CaseBoard`]s that converge on the stored state
//! despite duplicate, reordered or dropped notifications.

pub mod board;
pub mod clock;
pub mod config;
pub mod machine;
pub mod random;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod thread;


use std::sync::Arc;

use uuid::Uuid;

use consult_core::{
  Result,
  actor::SessionContext,
  case::{Case, CaseFilter, CaseIntake, CaseStatus},
  channel::NotificationChannel,
  message::Message,
  store::RecordStore,
};

pub use self::{
  board::{BoardView, CaseBoard},
  clock::{Clock, SystemClock},
  config::{ConcurrencyMode, ResponderConfig, RetryConfig, SyncConfig},
  machine::CaseMachine,
  random::{FixedRandom, RandomSource, ThreadRandom},
  reconciler::{Delivery, Reconciler, SubscriptionHandle},
  session::{CaseSession, CaseView},
  thread::{ThreadManager, ThreadObserver},
};

/// Entry point to the synchronization core.
pub struct Consult<S, C> {
  pub(crate) store:      Arc<S>,
  pub(crate) clock:      Arc<dyn Clock>,
  pub(crate) random:     Arc<dyn RandomSource>,
  pub(crate) config:     SyncConfig,
  pub(crate) machine:    Arc<CaseMachine<S>>,
  pub(crate) reconciler: Reconciler<S, C>,
  threads:               ThreadManager<S>,
}

impl<S, C> Consult<S, C>
where
  S: RecordStore + 'static,
  C: NotificationChannel,
{
  pub fn new(store: Arc<S>, channel: Arc<C>, config: SyncConfig) -> Self {
    Self::with_sources(store, channel, config, Arc::new(SystemClock), Arc::new(ThreadRandom))
  }

  /// Build with an explicit clock and randomness, e.g. for tests.
  pub fn with_sources(
    store: Arc<S>,
    channel: Arc<C>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
  ) -> Self {
    let machine = Arc::new(CaseMachine::new(
      Arc::clone(&store),
      Arc::clone(&clock),
      config.concurrency,
    ));
    let reconciler = Reconciler::new(Arc::clone(&store), channel, config.retry.clone());
    let threads = ThreadManager::new(
      Arc::clone(&store),
      Arc::clone(&clock),
      Arc::clone(&random),
      config.responder.clone(),
      None,
    );
    Self { store, clock, random, config, machine, reconciler, threads }
  }

  pub fn config(&self) -> &SyncConfig { &self.config }

  pub fn reconciler(&self) -> &Reconciler<S, C> { &self.reconciler }

  pub async fn create_case(&self, ctx: &SessionContext, intake: CaseIntake) -> Result<Case> {
    self.machine.create_case(ctx, intake).await
  }

  pub async fn case(&self, ctx: &SessionContext, case_id: Uuid) -> Result<Case> {
    self.machine.case(ctx, case_id).await
  }

  pub async fn list_cases(&self, ctx: &SessionContext, filter: &CaseFilter) -> Result<Vec<Case>> {
    self.machine.list_cases(ctx, filter).await
  }

  /// Move a case to `target`; closing it cancels its pending synthetic
  /// replies.
  pub async fn transition(
    &self,
    ctx: &SessionContext,
    case_id: Uuid,
    target: CaseStatus,
  ) -> Result<Case> {
    let case = self.machine.transition(ctx, case_id, target).await?;
    if case.status.is_terminal() {
      self.threads.cancel(case_id);
    }
    Ok(case)
  }

  pub async fn send(
    &self,
    ctx: &SessionContext,
    case_id: Uuid,
    text: &str,
  ) -> Result<Option<Message>> {
    self.threads.send(ctx, case_id, text).await
  }

  pub async fn messages(&self, ctx: &SessionContext, case_id: Uuid) -> Result<Vec<Message>> {
    self.threads.history(ctx, case_id).await
  }

  pub async fn message(
    &self,
    ctx: &SessionContext,
    case_id: Uuid,
    message_id: Uuid,
  ) -> Result<Message> {
    self.threads.message(ctx, case_id, message_id).await
  }

  /// Whether a synthetic reply scheduled through this instance is pending.
  pub fn is_composing(&self, case_id: Uuid) -> bool { self.threads.is_composing(case_id) }

  /// Open a live session on one case.
  pub async fn open_session(&self, ctx: SessionContext, case_id: Uuid) -> Result<CaseSession<S>> {
    CaseSession::open(self, ctx, case_id).await
  }

  /// Open the clinician's live case board.
  pub async fn open_board(&self, ctx: SessionContext) -> Result<CaseBoard<S>> {
    CaseBoard::open(self, ctx).await
  }
}

impl<S, C> Drop for Consult<S, C> {
  fn drop(&mut self) { self.threads.shutdown(); }
}
