//! Handlers for `/cases` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/cases` | Clinicians only. Optional `?status=` and `?limit=` |
//! | `POST` | `/cases` | Patients only. Body: a case intake |
//! | `GET`  | `/cases/{id}` | Patients only their own case |
//! | `POST` | `/cases/{id}/transition` | Clinicians only. Body: `{"status":"closed"}` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use consult_core::case::{Case, CaseFilter, CaseIntake, CaseStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, ConsultStore, actor::CurrentActor, error::ApiError};

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<CaseStatus>,
  pub limit:  Option<usize>,
}

/// `GET /cases[?status=<status>][&limit=<n>]`
pub async fn list<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Case>>, ApiError> {
  let filter = CaseFilter { status: params.status, limit: params.limit };
  let cases = state.consult.list_cases(&ctx, &filter).await?;
  Ok(Json(cases))
}

// ─── Create ──────────────────────────────────────────────────────────────────

/// `POST /cases`
pub async fn create<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Json(intake): Json<CaseIntake>,
) -> Result<impl IntoResponse, ApiError> {
  let case = state.consult.create_case(&ctx, intake).await?;
  Ok((StatusCode::CREATED, Json(case)))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /cases/{id}`
pub async fn get_one<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Path(id): Path<Uuid>,
) -> Result<Json<Case>, ApiError> {
  Ok(Json(state.consult.case(&ctx, id).await?))
}

// ─── Transition ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
  pub status: CaseStatus,
}

/// `POST /cases/{id}/transition`
pub async fn transition<S: ConsultStore>(
  State(state): State<AppState<S>>,
  CurrentActor(ctx): CurrentActor,
  Path(id): Path<Uuid>,
  Json(body): Json<TransitionBody>,
) -> Result<Json<Case>, ApiError> {
  let case = state.consult.transition(&ctx, id, body.status).await?;
  Ok(Json(case))
}
