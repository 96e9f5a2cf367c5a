//! Handlers for `/cases/{id}/messages` and single messages under it.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use consult_core::message::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, ConsultStore, actor::CurrentActor, error::ApiError};

/// A case's thread plus whether a synthetic reply is on its way.
#[derive(Debug, Serialize)]
pub struct Thread {
  pub case_id:   Uuid,
  pub messages:  Vec<Message>,
  pub composing: bool,
}

/// `GET /cases/{id}/messages`
pub async fn list<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Path(case_id): Path<Uuid>,
) -> Result<Json<Thread>, ApiError> {
  let messages = state.consult.messages(&ctx, case_id).await?;
  Ok(Json(Thread {
    case_id,
    messages,
    composing: state.consult.is_composing(case_id),
  }))
}

/// `GET /cases/{id}/messages/{message_id}`
pub async fn get_one<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Path((case_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Message>, ApiError> {
  Ok(Json(state.consult.message(&ctx, case_id, message_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
  pub text: String,
}

/// `POST /cases/{id}/messages` — 201 with the stored message, or 204 when
/// the text was blank and nothing was sent.
pub async fn send<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Path(case_id): Path<Uuid>,
  Json(body): Json<SendBody>,
) -> Result<Response, ApiError> {
  let sent = state.consult.send(&ctx, case_id, &body.text).await?;
  Ok(match sent {
    Some(message) => (StatusCode::CREATED, Json(message)).into_response(),
    None => StatusCode::NO_CONTENT.into_response(),
  })
}
