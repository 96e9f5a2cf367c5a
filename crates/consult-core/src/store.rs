//! The `RecordStore` trait — the narrow interface to durable storage.
//!
//! Implemented by storage backends (e.g. `consult-store-sqlite`). The sync
//! layer depends on this abstraction, not on any concrete backend. The store
//! is shared and externally synchronised; no transactions are assumed beyond
//! the atomicity of each individual call.

use std::future::Future;

use uuid::Uuid;

use crate::{
  case::{Case, CaseFilter, CasePatch, UpdateOutcome},
  message::Message,
};

/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Cases ─────────────────────────────────────────────────────────────

  /// Persist a freshly created case. Fails if the id is already taken.
  fn insert_case(
    &self,
    case: Case,
  ) -> impl Future<Output = Result<Case, Self::Error>> + Send + '_;

  /// Retrieve a case by id. Returns `None` if not found.
  fn get_case(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Case>, Self::Error>> + Send + '_;

  /// List cases matching `filter`, newest first.
  fn list_cases<'a>(
    &'a self,
    filter: &'a CaseFilter,
  ) -> impl Future<Output = Result<Vec<Case>, Self::Error>> + Send + 'a;

  /// Apply a status write. The store bumps `version` on every applied write.
  fn update_case(
    &self,
    id: Uuid,
    patch: CasePatch,
  ) -> impl Future<Output = Result<UpdateOutcome, Self::Error>> + Send + '_;

  // ── Messages — append-only ────────────────────────────────────────────

  /// Append a message. Fails if the id is already taken or the case is
  /// unknown.
  fn insert_message(
    &self,
    message: Message,
  ) -> impl Future<Output = Result<Message, Self::Error>> + Send + '_;

  fn get_message(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send + '_;

  /// All messages of a case, ascending by `(timestamp, id)`.
  fn list_messages(
    &self,
    case_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send + '_;
}
