//! The case status state machine.
//!
//! This module only answers "is this move legal for this actor"; persisting
//! the move is the job of the sync layer.

use crate::{
  Error, Result,
  actor::Actor,
  case::CaseStatus::{self, *},
};

/// Every legal `(from, to)` status move.
pub const EDGES: &[(CaseStatus, CaseStatus)] = &[
  (Waiting, ResponderAvailable),
  (ResponderAvailable, InSession),
  (InSession, ResponderAvailable),
  (ResponderAvailable, Waiting),
  (InSession, Waiting),
  (Waiting, Closed),
  (ResponderAvailable, Closed),
  (InSession, Closed),
];

impl CaseStatus {
  /// Whether a case in this status can move to `target`.
  pub fn can_transition_to(self, target: CaseStatus) -> bool {
    EDGES.contains(&(self, target))
  }

  /// Terminal statuses have no outgoing edges.
  pub fn is_terminal(self) -> bool {
    !EDGES.iter().any(|(from, _)| *from == self)
  }
}

/// Check that `actor` may move a case from `from` to `to`.
///
/// Authorization is checked first so that a patient probing for legal moves
/// learns nothing about the current status.
pub fn authorize(actor: &Actor, from: CaseStatus, to: CaseStatus) -> Result<()> {
  if !actor.is_clinician() {
    return Err(Error::Unauthorized {
      role:   actor.role(),
      action: "change case status",
    });
  }
  if !from.can_transition_to(to) {
    return Err(Error::InvalidTransition { from, to });
  }
  Ok(())
}
