//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// No usable actor headers on the request.
  #[error("unauthenticated: {0}")]
  Unauthenticated(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  /// The store failed transiently; the client may retry.
  #[error("unavailable: {0}")]
  Unavailable(String),
}

impl From<consult_core::Error> for ApiError {
  fn from(e: consult_core::Error) -> Self {
    use consult_core::Error as E;

    let message = e.to_string();
    match e {
      E::Validation(_) => Self::BadRequest(message),
      E::Unauthorized { .. } => Self::Forbidden(message),
      E::CaseNotFound(_) | E::MessageNotFound(_) => Self::NotFound(message),
      E::InvalidTransition { .. } | E::Conflict { .. } => Self::Conflict(message),
      E::Store(_) | E::ChannelDisconnect => {
        tracing::error!(error = %message, "store failure");
        Self::Unavailable(message)
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, m.clone()),
      ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
