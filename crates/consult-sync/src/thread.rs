//! [`ThreadManager`] — message sends and the simulated responder.
//!
//! Every patient message schedules one synthetic reply after a random delay
//! inside the configured bounds. While at least one reply is pending for a
//! case, that case is "composing". Pending replies are cancelled when the
//! case closes, when the manager shuts down, and (if configured) when a
//! human responder writes first.
//!
//! A reply keeps its pending entry until it has been written or has stood
//! down, so the case stays composing for the whole time and cancellation can
//! abort it up to the moment the write is handed to the store. Each entry
//! owns exactly one timer task, so a reply writes at most once.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use tokio::task::JoinHandle;
use uuid::Uuid;

use consult_core::{
  Error, Result,
  actor::SessionContext,
  message::{Message, SenderRole},
  store::RecordStore,
};

use crate::{clock::Clock, config::ResponderConfig, random::RandomSource};

/// Local observer of thread activity, e.g. a session cache.
pub trait ThreadObserver: Send + Sync {
  /// A message was written through this manager.
  fn message_appended(&self, message: &Message);

  fn composing_changed(&self, case_id: Uuid, composing: bool);
}

struct PendingReply {
  id:   u64,
  task: JoinHandle<()>,
}

struct Shared<S> {
  store:     Arc<S>,
  clock:     Arc<dyn Clock>,
  random:    Arc<dyn RandomSource>,
  config:    ResponderConfig,
  observer:  Option<Arc<dyn ThreadObserver>>,
  pending:   Mutex<HashMap<Uuid, Vec<PendingReply>>>,
  /// Ids of replies being written right now, so that an echo arriving on
  /// the channel before the observer has the reply is not mistaken for a
  /// human responder. Once the observer has it, later echoes are duplicates.
  synthetic: Mutex<HashSet<Uuid>>,
  next_id:   AtomicU64,
  shut_down: AtomicBool,
}

impl<S> Shared<S> {
  fn pending(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<PendingReply>>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn synthetic(&self) -> MutexGuard<'_, HashSet<Uuid>> {
    self.synthetic.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn notify_composing(&self, case_id: Uuid, composing: bool) {
    if let Some(observer) = &self.observer {
      observer.composing_changed(case_id, composing);
    }
  }

  fn notify_appended(&self, message: &Message) {
    if let Some(observer) = &self.observer {
      observer.message_appended(message);
    }
  }

  /// Remove every pending reply of `case_id`. Returns how many there were.
  fn cancel(&self, case_id: Uuid) -> usize {
    let Some(replies) = self.pending().remove(&case_id) else {
      return 0;
    };
    for reply in &replies {
      reply.task.abort();
    }
    self.notify_composing(case_id, false);
    replies.len()
  }

  /// Whether reply `reply_id` has neither been cancelled nor shut down.
  fn still_pending(&self, case_id: Uuid, reply_id: u64) -> bool {
    !self.shut_down.load(Ordering::SeqCst)
      && self
        .pending()
        .get(&case_id)
        .is_some_and(|replies| replies.iter().any(|r| r.id == reply_id))
  }

  /// Drop the entry of a reply that has written or stood down.
  fn finish(&self, case_id: Uuid, reply_id: u64) {
    let idle = {
      let mut pending = self.pending();
      let Some(replies) = pending.get_mut(&case_id) else {
        return;
      };
      let Some(pos) = replies.iter().position(|r| r.id == reply_id) else {
        return;
      };
      replies.remove(pos);
      let idle = replies.is_empty();
      if idle {
        pending.remove(&case_id);
      }
      idle
    };
    if idle {
      self.notify_composing(case_id, false);
    }
  }
}

impl<S: RecordStore> Shared<S> {
  async fn fire(&self, case_id: Uuid, reply_id: u64) {
    if self.still_pending(case_id, reply_id)
      && self.writable(case_id).await
      && self.still_pending(case_id, reply_id)
    {
      self.write_reply(case_id).await;
    }
    self.finish(case_id, reply_id);
  }

  async fn write_reply(&self, case_id: Uuid) {
    let templates = &self.config.templates;
    let Some(reply) = templates
      .get(self.random.pick(templates.len()))
      .and_then(|text| Message::compose(case_id, SenderRole::Responder, text, self.clock.now()))
    else {
      return;
    };

    let reply_id = reply.id;
    self.synthetic().insert(reply_id);
    match self.store.insert_message(reply).await {
      Ok(reply) => {
        tracing::debug!(%case_id, message_id = %reply.id, "synthetic reply sent");
        self.notify_appended(&reply);
      }
      Err(e) => tracing::warn!(%case_id, error = %e, "failed to send synthetic reply"),
    }
    self.synthetic().remove(&reply_id);
  }

  /// A reply stands down if the case closed while its timer ran.
  async fn writable(&self, case_id: Uuid) -> bool {
    match self.store.get_case(case_id).await {
      Ok(Some(case)) => !case.status.is_terminal(),
      Ok(None) => false,
      Err(e) => {
        tracing::warn!(%case_id, error = %e, "could not check case before reply");
        false
      }
    }
  }
}

// ─── ThreadManager ───────────────────────────────────────────────────────────

/// Cloning is cheap and shares the pending-reply table.
pub struct ThreadManager<S> {
  shared: Arc<Shared<S>>,
}

impl<S> Clone for ThreadManager<S> {
  fn clone(&self) -> Self { Self { shared: Arc::clone(&self.shared) } }
}

impl<S: RecordStore + 'static> ThreadManager<S> {
  pub fn new(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    config: ResponderConfig,
    observer: Option<Arc<dyn ThreadObserver>>,
  ) -> Self {
    Self {
      shared: Arc::new(Shared {
        store,
        clock,
        random,
        config,
        observer,
        pending: Mutex::new(HashMap::new()),
        synthetic: Mutex::new(HashSet::new()),
        next_id: AtomicU64::new(0),
        shut_down: AtomicBool::new(false),
      }),
    }
  }

  /// Append a message to a case's thread as the context's actor.
  ///
  /// Whitespace-only text is a no-op and returns `Ok(None)`. A patient
  /// message schedules one synthetic reply.
  pub async fn send(
    &self,
    ctx: &SessionContext,
    case_id: Uuid,
    text: &str,
  ) -> Result<Option<Message>> {
    ctx.actor.ensure_can_access(case_id)?;
    let shared = &self.shared;
    let sender = ctx.actor.sender_role();

    let Some(message) = Message::compose(case_id, sender, text, shared.clock.now()) else {
      tracing::debug!(%case_id, "ignoring blank message");
      return Ok(None);
    };

    let case = shared
      .store
      .get_case(case_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::CaseNotFound(case_id))?;
    if case.status.is_terminal() {
      return Err(Error::Validation("case is closed".into()));
    }

    let message = shared
      .store
      .insert_message(message)
      .await
      .map_err(Error::store)?;
    tracing::info!(%case_id, message_id = %message.id, %sender, "message sent");
    shared.notify_appended(&message);

    match sender {
      SenderRole::Patient => self.schedule_reply(case_id),
      SenderRole::Responder if shared.config.suppress_on_human_reply => {
        self.cancel(case_id);
      }
      SenderRole::Responder => {}
    }
    Ok(Some(message))
  }

  /// The full thread of a case, ascending.
  pub async fn history(&self, ctx: &SessionContext, case_id: Uuid) -> Result<Vec<Message>> {
    ctx.actor.ensure_can_access(case_id)?;
    self
      .shared
      .store
      .list_messages(case_id)
      .await
      .map_err(Error::store)
  }

  /// One message of a case's thread.
  pub async fn message(
    &self,
    ctx: &SessionContext,
    case_id: Uuid,
    message_id: Uuid,
  ) -> Result<Message> {
    ctx.actor.ensure_can_access(case_id)?;
    self
      .shared
      .store
      .get_message(message_id)
      .await
      .map_err(Error::store)?
      .filter(|message| message.case_id == case_id)
      .ok_or(Error::MessageNotFound(message_id))
  }

  fn schedule_reply(&self, case_id: Uuid) {
    let config = &self.shared.config;
    if !config.enabled || config.templates.is_empty() {
      return;
    }
    if self.shared.shut_down.load(Ordering::SeqCst) {
      return;
    }

    let (min, max) = config.delay_bounds();
    let delay = self.shared.random.delay_between(min, max);
    let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

    let started = {
      // The timer task checks its entry under this lock, so it cannot fire
      // before the entry exists.
      let mut pending = self.shared.pending();
      let shared = Arc::clone(&self.shared);
      let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        shared.fire(case_id, id).await;
      });
      let replies = pending.entry(case_id).or_default();
      replies.push(PendingReply { id, task });
      replies.len() == 1
    };

    tracing::debug!(%case_id, ?delay, "synthetic reply scheduled");
    if started {
      self.shared.notify_composing(case_id, true);
    }
  }
}

impl<S> ThreadManager<S> {
  /// Cancel every pending synthetic reply of `case_id`.
  pub fn cancel(&self, case_id: Uuid) -> usize {
    let cancelled = self.shared.cancel(case_id);
    if cancelled > 0 {
      tracing::debug!(%case_id, cancelled, "synthetic replies cancelled");
    }
    cancelled
  }

  /// React to a message observed on the channel rather than written here.
  ///
  /// With `suppress_on_human_reply`, a responder message that this manager
  /// did not generate cancels the case's pending replies.
  pub fn observe_remote(&self, message: &Message) {
    if !self.shared.config.suppress_on_human_reply || message.sender != SenderRole::Responder {
      return;
    }
    if self.shared.synthetic().contains(&message.id) {
      return;
    }
    self.cancel(message.case_id);
  }

  /// Whether a reply is pending for `case_id`, including one being written.
  pub fn is_composing(&self, case_id: Uuid) -> bool {
    self
      .shared
      .pending()
      .get(&case_id)
      .is_some_and(|replies| !replies.is_empty())
  }

  /// Cancel everything and refuse to schedule further replies.
  pub fn shutdown(&self) {
    self.shared.shut_down.store(true, Ordering::SeqCst);
    let drained: Vec<_> = self.shared.pending().drain().collect();
    for (case_id, replies) in drained {
      for reply in &replies {
        reply.task.abort();
      }
      self.shared.notify_composing(case_id, false);
    }
  }
}
