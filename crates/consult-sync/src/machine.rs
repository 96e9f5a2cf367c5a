//! [`CaseMachine`] — validated, persisted case lifecycle operations.

use std::sync::Arc;

use uuid::Uuid;

use consult_core::{
  Error, Result,
  actor::SessionContext,
  case::{Case, CaseFilter, CaseIntake, CasePatch, CaseStatus, UpdateOutcome},
  lifecycle,
  store::RecordStore,
};

use crate::{clock::Clock, config::ConcurrencyMode};

pub struct CaseMachine<S> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  mode:  ConcurrencyMode,
}

impl<S: RecordStore> CaseMachine<S> {
  pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, mode: ConcurrencyMode) -> Self {
    Self { store, clock, mode }
  }

  /// Validate an intake and persist it as a new `waiting` case.
  ///
  /// Only patients submit intakes. The returned case carries the assigned
  /// id, which the patient's context should be bound to afterwards.
  pub async fn create_case(&self, ctx: &SessionContext, intake: CaseIntake) -> Result<Case> {
    if ctx.actor.is_clinician() {
      return Err(Error::Unauthorized {
        role:   ctx.actor.role(),
        action: "submit an intake",
      });
    }

    let case = intake.into_case(Uuid::new_v4(), self.clock.now())?;
    let case = self.store.insert_case(case).await.map_err(Error::store)?;
    tracing::info!(
      case_id = %case.id,
      urgency = %case.urgency_level,
      session = %ctx.session_id,
      "case created"
    );
    Ok(case)
  }

  /// Move a case to `target`.
  ///
  /// Under [`ConcurrencyMode::Versioned`] the write is a compare-and-swap on
  /// the version that was read, and losing to a concurrent writer yields
  /// [`Error::Conflict`]. The caller decides whether to re-read and retry.
  pub async fn transition(
    &self,
    ctx: &SessionContext,
    case_id: Uuid,
    target: CaseStatus,
  ) -> Result<Case> {
    if !ctx.actor.is_clinician() {
      return Err(Error::Unauthorized {
        role:   ctx.actor.role(),
        action: "change case status",
      });
    }

    let current = self.load(case_id).await?;
    lifecycle::authorize(&ctx.actor, current.status, target)?;

    let patch = CasePatch {
      status:           target,
      updated_at:       self.clock.now().max(current.updated_at),
      expected_version: match self.mode {
        ConcurrencyMode::Versioned => Some(current.version),
        ConcurrencyMode::LastWriteWins => None,
      },
    };

    match self.store.update_case(case_id, patch).await.map_err(Error::store)? {
      UpdateOutcome::Applied(case) => {
        tracing::info!(
          %case_id,
          from = %current.status,
          to = %case.status,
          version = case.version,
          "case transitioned"
        );
        Ok(case)
      }
      UpdateOutcome::Missing => Err(Error::CaseNotFound(case_id)),
      UpdateOutcome::Stale(found) => {
        tracing::debug!(
          %case_id,
          expected = current.version,
          found = found.version,
          "transition lost a concurrent write"
        );
        Err(Error::Conflict {
          case_id,
          expected: current.version,
          found: found.version,
        })
      }
    }
  }

  /// Read one case the actor is allowed to see.
  pub async fn case(&self, ctx: &SessionContext, case_id: Uuid) -> Result<Case> {
    ctx.actor.ensure_can_access(case_id)?;
    self.load(case_id).await
  }

  /// The clinician's case list, newest first.
  pub async fn list_cases(&self, ctx: &SessionContext, filter: &CaseFilter) -> Result<Vec<Case>> {
    if !ctx.actor.is_clinician() {
      return Err(Error::Unauthorized {
        role:   ctx.actor.role(),
        action: "list cases",
      });
    }
    self.store.list_cases(filter).await.map_err(Error::store)
  }

  async fn load(&self, case_id: Uuid) -> Result<Case> {
    self
      .store
      .get_case(case_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::CaseNotFound(case_id))
  }
}
