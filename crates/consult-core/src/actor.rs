//! Actors and the explicit session context.
//!
//! Identity is established by an external auth collaborator; the core trusts
//! the [`Actor`] it is handed and only enforces role capabilities.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, message::SenderRole};

/// The capability class of an actor.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
  Patient,
  Clinician,
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Actor {
  /// A patient, bound to their own case once it has been submitted.
  Patient { case_id: Option<Uuid> },
  Clinician { clinician_id: String },
}

impl Actor {
  pub fn role(&self) -> Role {
    match self {
      Self::Patient { .. } => Role::Patient,
      Self::Clinician { .. } => Role::Clinician,
    }
  }

  pub fn is_clinician(&self) -> bool { matches!(self, Self::Clinician { .. }) }

  /// The sender role this actor writes messages as.
  pub fn sender_role(&self) -> SenderRole {
    match self {
      Self::Patient { .. } => SenderRole::Patient,
      Self::Clinician { .. } => SenderRole::Responder,
    }
  }

  /// Patients may only touch their own case; clinicians may touch any.
  pub fn ensure_can_access(&self, case_id: Uuid) -> Result<()> {
    match self {
      Self::Clinician { .. } => Ok(()),
      Self::Patient { case_id: Some(own) } if *own == case_id => Ok(()),
      Self::Patient { .. } => Err(Error::Unauthorized {
        role:   Role::Patient,
        action: "access another patient's case",
      }),
    }
  }
}

/// The explicit per-client context passed into every core operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
  pub session_id: Uuid,
  pub actor:      Actor,
}

impl SessionContext {
  pub fn new(actor: Actor) -> Self {
    Self { session_id: Uuid::new_v4(), actor }
  }

  pub fn patient() -> Self { Self::new(Actor::Patient { case_id: None }) }

  pub fn clinician(clinician_id: impl Into<String>) -> Self {
    Self::new(Actor::Clinician { clinician_id: clinician_id.into() })
  }

  /// The same session, bound to the case a patient just submitted.
  ///
  /// Clinician contexts are returned unchanged.
  pub fn with_case(mut self, case_id: Uuid) -> Self {
    if let Actor::Patient { case_id: bound } = &mut self.actor {
      *bound = Some(case_id);
    }
    self
  }
}
