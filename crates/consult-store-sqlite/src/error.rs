//! Error type for `consult-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value outside its domain (unknown enum string,
  /// negative version, ...).
  #[error("cannot decode column {column}: {value:?}")]
  Decode { column: &'static str, value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Carry a decoding failure out of a `tokio_rusqlite` closure.
pub(crate) fn in_call(e: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}
