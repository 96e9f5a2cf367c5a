//! JSON HTTP API for Consult.
//!
//! Exposes an axum [`Router`] over a [`Consult`] instance whose store also
//! serves as its notification channel. The acting client is taken from the
//! `x-actor-*` headers (see [`actor`]); authentication itself is the
//! caller's responsibility.

pub mod actor;
pub mod cases;
pub mod error;
pub mod messages;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use consult_core::{channel::NotificationChannel, store::RecordStore};
use consult_sync::{Consult, SyncConfig};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  #[serde(default)]
  pub sync:       SyncConfig,
}

// ─── Application state ───────────────────────────────────────────────────────

/// A record store that is also its own notification channel.
pub trait ConsultStore: RecordStore + NotificationChannel + 'static {}

impl<T> ConsultStore for T where T: RecordStore + NotificationChannel + 'static {}

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub consult: Arc<Consult<S, S>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self { Self { consult: Arc::clone(&self.consult) } }
}

impl<S: ConsultStore> AppState<S> {
  pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
    Self { consult: Arc::new(Consult::new(Arc::clone(&store), store, config)) }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
pub fn router<S: ConsultStore>(state: AppState<S>) -> Router {
  Router::new()
    .route("/cases", get(cases::list::<S>).post(cases::create::<S>))
    .route("/cases/{id}", get(cases::get_one::<S>))
    .route("/cases/{id}/transition", post(cases::transition::<S>))
    .route(
      "/cases/{id}/messages",
      get(messages::list::<S>).post(messages::send::<S>),
    )
    .route("/cases/{id}/messages/{message_id}", get(messages::get_one::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
  };
  use consult_core::{
    case::{Case, CaseStatus},
    message::Message,
  };
  use consult_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;
  use uuid::Uuid;

  use super::*;
  use crate::actor::{CASE_HEADER, ID_HEADER, ROLE_HEADER};

  async fn make_state() -> AppState<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut sync = SyncConfig::default();
    // Long enough that no reply lands while a test runs.
    sync.responder.min_delay_ms = 60_000;
    sync.responder.max_delay_ms = 60_000;
    AppState::new(Arc::new(store), sync)
  }

  enum As {
    Anonymous,
    Patient(Option<Uuid>),
    Clinician,
  }

  async fn call(
    state: &AppState<SqliteStore>,
    method: &str,
    uri: &str,
    who: As,
    body: Option<Value>,
  ) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = match who {
      As::Anonymous => builder,
      As::Patient(case) => {
        let builder = builder.header(ROLE_HEADER, "patient");
        match case {
          Some(id) => builder.header(CASE_HEADER, id.to_string()),
          None => builder,
        }
      }
      As::Clinician => builder
        .header(ROLE_HEADER, "clinician")
        .header(ID_HEADER, "dr-grey"),
    };
    let body = match body {
      Some(json) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_string())
      }
      None => Body::empty(),
    };
    router(state.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap()
  }

  async fn json_body<T: serde::de::DeserializeOwned>(resp: Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  fn intake() -> Value {
    json!({
      "name": "Jane Doe",
      "age": 34,
      "gender": "female",
      "common_symptoms": ["Fever", "Cough"],
      "additional_symptoms": "worse at night",
      "urgency_level": "high"
    })
  }

  async fn submit(state: &AppState<SqliteStore>) -> Case {
    let resp = call(state, "POST", "/cases", As::Patient(None), Some(intake())).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    json_body(resp).await
  }

  // ── Cases ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn create_returns_201_and_owner_can_read() {
    let state = make_state().await;
    let case = submit(&state).await;
    assert_eq!(case.status, CaseStatus::Waiting);
    assert_eq!(case.common_symptoms.len(), 2);

    let resp = call(&state, "GET", &format!("/cases/{}", case.id), As::Patient(Some(case.id)), None)
      .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched: Case = json_body(resp).await;
    assert_eq!(fetched, case);

    let resp = call(
      &state,
      "GET",
      &format!("/cases/{}", case.id),
      As::Patient(Some(Uuid::new_v4())),
      None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn invalid_intake_returns_400() {
    let state = make_state().await;
    let mut body = intake();
    body["common_symptoms"] = json!([]);
    body["additional_symptoms"] = json!("   ");
    let resp = call(&state, "POST", "/cases", As::Patient(None), Some(body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: Value = json_body(resp).await;
    assert!(err["error"].as_str().unwrap().contains("symptom"));
  }

  #[tokio::test]
  async fn missing_actor_returns_401() {
    let state = make_state().await;
    let resp = call(&state, "GET", "/cases", As::Anonymous, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn clinicians_list_and_filter_cases() {
    let state = make_state().await;
    let first = submit(&state).await;
    let second = submit(&state).await;

    let resp = call(&state, "GET", "/cases", As::Patient(Some(first.id)), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = call(&state, "GET", "/cases", As::Clinician, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let all: Vec<Case> = json_body(resp).await;
    assert_eq!(all.len(), 2);

    call(
      &state,
      "POST",
      &format!("/cases/{}/transition", first.id),
      As::Clinician,
      Some(json!({ "status": "responder_available" })),
    )
    .await;
    let resp = call(&state, "GET", "/cases?status=waiting", As::Clinician, None).await;
    let waiting: Vec<Case> = json_body(resp).await;
    assert_eq!(waiting.iter().map(|c| c.id).collect::<Vec<_>>(), vec![second.id]);
  }

  #[tokio::test]
  async fn transitions_map_errors_to_status_codes() {
    let state = make_state().await;
    let case = submit(&state).await;
    let uri = format!("/cases/{}/transition", case.id);

    let resp = call(
      &state,
      "POST",
      &uri,
      As::Patient(Some(case.id)),
      Some(json!({ "status": "closed" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = call(&state, "POST", &uri, As::Clinician, Some(json!({ "status": "in_session" })))
      .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = call(
      &state,
      "POST",
      &uri,
      As::Clinician,
      Some(json!({ "status": "responder_available" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let moved: Case = json_body(resp).await;
    assert_eq!(moved.status, CaseStatus::ResponderAvailable);
    assert_eq!(moved.version, 2);

    let resp = call(
      &state,
      "POST",
      &format!("/cases/{}/transition", Uuid::new_v4()),
      As::Clinician,
      Some(json!({ "status": "closed" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  // ── Messages ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn sending_messages() {
    let state = make_state().await;
    let case = submit(&state).await;
    let uri = format!("/cases/{}/messages", case.id);
    let patient = || As::Patient(Some(case.id));

    let resp = call(&state, "POST", &uri, patient(), Some(json!({ "text": "   " }))).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = call(&state, "POST", &uri, patient(), Some(json!({ "text": " I feel dizzy " })))
      .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: Message = json_body(resp).await;
    assert_eq!(sent.text, "I feel dizzy");

    let resp = call(&state, "GET", &uri, patient(), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let thread: Value = json_body(resp).await;
    assert_eq!(thread["messages"].as_array().unwrap().len(), 1);
    assert_eq!(thread["composing"], json!(true));

    call(
      &state,
      "POST",
      &format!("/cases/{}/transition", case.id),
      As::Clinician,
      Some(json!({ "status": "closed" })),
    )
    .await;
    let resp = call(&state, "GET", &uri, patient(), None).await;
    let thread: Value = json_body(resp).await;
    assert_eq!(thread["composing"], json!(false));

    let resp = call(&state, "POST", &uri, patient(), Some(json!({ "text": "hello?" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn single_messages_are_scoped_to_their_case() {
    let state = make_state().await;
    let case = submit(&state).await;
    let other = submit(&state).await;
    let resp = call(
      &state,
      "POST",
      &format!("/cases/{}/messages", case.id),
      As::Patient(Some(case.id)),
      Some(json!({ "text": "hello" })),
    )
    .await;
    let sent: Message = json_body(resp).await;

    let resp = call(
      &state,
      "GET",
      &format!("/cases/{}/messages/{}", case.id, sent.id),
      As::Patient(Some(case.id)),
      None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched: Message = json_body(resp).await;
    assert_eq!(fetched, sent);

    let resp = call(
      &state,
      "GET",
      &format!("/cases/{}/messages/{}", other.id, sent.id),
      As::Clinician,
      None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = call(
      &state,
      "GET",
      &format!("/cases/{}/messages/{}", case.id, Uuid::new_v4()),
      As::Clinician,
      None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn other_patients_cannot_read_the_thread() {
    let state = make_state().await;
    let case = submit(&state).await;
    let resp = call(
      &state,
      "GET",
      &format!("/cases/{}/messages", case.id),
      As::Patient(None),
      None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }
}
