//! Actor extraction from request headers.
//!
//! Identity is established upstream; this layer trusts the headers it is
//! given and only turns them into a [`SessionContext`].

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use consult_core::actor::{Role, SessionContext};
use uuid::Uuid;

use crate::error::ApiError;

pub const ROLE_HEADER: &str = "x-actor-role";
/// The patient's own case, once submitted.
pub const CASE_HEADER: &str = "x-actor-case";
pub const ID_HEADER: &str = "x-actor-id";

/// The acting client, present in a handler when the headers were valid.
pub struct CurrentActor(pub SessionContext);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
}

/// Build the request's session context from its actor headers.
pub fn context_from_headers(headers: &HeaderMap) -> Result<SessionContext, ApiError> {
  let role = header(headers, ROLE_HEADER)
    .ok_or_else(|| ApiError::Unauthenticated(format!("missing {ROLE_HEADER} header")))?;
  let role: Role = role
    .parse()
    .map_err(|_| ApiError::BadRequest(format!("unknown role {role:?}")))?;

  match role {
    Role::Patient => {
      let ctx = SessionContext::patient();
      match header(headers, CASE_HEADER) {
        Some(raw) => {
          let case_id = Uuid::parse_str(raw)
            .map_err(|_| ApiError::BadRequest(format!("invalid {CASE_HEADER}: {raw:?}")))?;
          Ok(ctx.with_case(case_id))
        }
        None => Ok(ctx),
      }
    }
    Role::Clinician => {
      let id = header(headers, ID_HEADER)
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {ID_HEADER} header")))?;
      Ok(SessionContext::clinician(id))
    }
  }
}

impl<S> FromRequestParts<S> for CurrentActor
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    context_from_headers(&parts.headers).map(CurrentActor)
  }
}
