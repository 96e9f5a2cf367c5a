//! Error types for `consult-core`.
//!
//! This is the single failure taxonomy shared by every layer of the
//! synchronization core. Storage backends keep their own error types and are
//! folded into [`Error::Store`] at the trait boundary.

use thiserror::Error;
use uuid::Uuid;

use crate::{actor::Role, case::CaseStatus};

#[derive(Debug, Error)]
pub enum Error {
  /// Missing or invalid intake fields, or a write into a closed case.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("{role} may not {action}")]
  Unauthorized { role: Role, action: &'static str },

  #[error("cannot move case from {from} to {to}")]
  InvalidTransition { from: CaseStatus, to: CaseStatus },

  #[error("case not found: {0}")]
  CaseNotFound(Uuid),

  #[error("message not found: {0}")]
  MessageNotFound(Uuid),

  /// A versioned update lost the race against another writer.
  #[error("case {case_id} changed concurrently (expected v{expected}, found v{found})")]
  Conflict { case_id: Uuid, expected: u64, found: u64 },

  /// A transient failure of the record store; the call may be retried.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("notification channel disconnected")]
  ChannelDisconnect,
}

impl Error {
  /// Wrap a backend error as a transient store failure.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether the triggering call may succeed if repeated unchanged.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Store(_) | Self::ChannelDisconnect)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
