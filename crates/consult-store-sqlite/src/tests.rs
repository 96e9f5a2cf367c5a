//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use consult_core::{
  case::{Case, CaseFilter, CaseIntake, CasePatch, CaseStatus, UpdateOutcome, UrgencyLevel},
  channel::{ChangeStream, ChannelSignal, NotificationChannel},
  event::{EntityKind, Operation, Predicate, Record},
  message::{Message, SenderRole},
  store::RecordStore,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn new_case(name: &str) -> Case {
  CaseIntake {
    name:                name.into(),
    age:                 Some(30),
    gender:              "female".into(),
    common_symptoms:     ["Fever".to_owned(), "Cough".to_owned()].into(),
    additional_symptoms: Some("since Tuesday".into()),
    urgency_level:       Some(UrgencyLevel::High),
  }
  .into_case(Uuid::new_v4(), Utc::now())
  .unwrap()
}

fn patch(status: CaseStatus, expected_version: Option<u64>) -> CasePatch {
  CasePatch { status, updated_at: Utc::now(), expected_version }
}

// ─── Cases ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_case() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();

  let fetched = s.get_case(case.id).await.unwrap().unwrap();
  assert_eq!(fetched, case);
  assert_eq!(fetched.status, CaseStatus::Waiting);
  assert_eq!(fetched.common_symptoms.len(), 2);
}

#[tokio::test]
async fn get_case_missing_returns_none() {
  let s = store().await;
  assert!(s.get_case(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_case_id_is_rejected() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  assert!(s.insert_case(case).await.is_err());
}

#[tokio::test]
async fn list_cases_newest_first_and_filtered() {
  let s = store().await;
  let mut older = new_case("Older");
  older.created_at -= Duration::minutes(5);
  older.updated_at = older.created_at;
  let older = s.insert_case(older).await.unwrap();
  let newer = s.insert_case(new_case("Newer")).await.unwrap();

  let all = s.list_cases(&CaseFilter::default()).await.unwrap();
  let ids: Vec<_> = all.iter().map(|c| c.id).collect();
  assert_eq!(ids, vec![newer.id, older.id]);

  s.update_case(older.id, patch(CaseStatus::ResponderAvailable, None))
    .await
    .unwrap();
  let waiting = s
    .list_cases(&CaseFilter { status: Some(CaseStatus::Waiting), limit: None })
    .await
    .unwrap();
  assert_eq!(waiting.len(), 1);
  assert_eq!(waiting[0].id, newer.id);

  let limited = s
    .list_cases(&CaseFilter { status: None, limit: Some(1) })
    .await
    .unwrap();
  assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn update_bumps_version_and_never_rewinds_updated_at() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();

  let mut backdated = patch(CaseStatus::ResponderAvailable, Some(1));
  backdated.updated_at = case.created_at - Duration::hours(1);
  let UpdateOutcome::Applied(updated) = s.update_case(case.id, backdated).await.unwrap()
  else {
    panic!("expected the update to apply");
  };

  assert_eq!(updated.status, CaseStatus::ResponderAvailable);
  assert_eq!(updated.version, 2);
  assert_eq!(updated.updated_at, case.updated_at);
  assert_eq!(s.get_case(case.id).await.unwrap().unwrap(), updated);
}

#[tokio::test]
async fn versioned_update_with_stale_version_is_rejected() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  s.update_case(case.id, patch(CaseStatus::ResponderAvailable, Some(1)))
    .await
    .unwrap();

  let outcome = s
    .update_case(case.id, patch(CaseStatus::Waiting, Some(1)))
    .await
    .unwrap();
  let UpdateOutcome::Stale(current) = outcome else {
    panic!("expected a stale outcome, got {outcome:?}");
  };
  assert_eq!(current.version, 2);
  assert_eq!(current.status, CaseStatus::ResponderAvailable);
}

#[tokio::test]
async fn unconditional_update_always_applies() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  s.update_case(case.id, patch(CaseStatus::ResponderAvailable, None))
    .await
    .unwrap();
  let outcome = s
    .update_case(case.id, patch(CaseStatus::InSession, None))
    .await
    .unwrap();
  assert!(matches!(outcome, UpdateOutcome::Applied(c) if c.version == 3));
}

#[tokio::test]
async fn update_missing_case() {
  let s = store().await;
  let outcome = s
    .update_case(Uuid::new_v4(), patch(CaseStatus::Closed, None))
    .await
    .unwrap();
  assert!(matches!(outcome, UpdateOutcome::Missing));
}

// ─── Messages ────────────────────────────────────────────────────────────────

fn message(case_id: Uuid, offset_ms: i64, text: &str) -> Message {
  Message::compose(
    case_id,
    SenderRole::Patient,
    text,
    Utc::now() + Duration::milliseconds(offset_ms),
  )
  .unwrap()
}

#[tokio::test]
async fn messages_are_listed_in_timestamp_order() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();

  s.insert_message(message(case.id, 300, "third")).await.unwrap();
  s.insert_message(message(case.id, 100, "first")).await.unwrap();
  s.insert_message(message(case.id, 200, "second")).await.unwrap();

  let texts: Vec<_> = s
    .list_messages(case.id)
    .await
    .unwrap()
    .into_iter()
    .map(|m| m.text)
    .collect();
  assert_eq!(texts, ["first", "second", "third"]);
}

#[tokio::test]
async fn message_roundtrip_and_lookup() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  let sent = s.insert_message(message(case.id, 0, "I have a fever")).await.unwrap();

  assert_eq!(s.get_message(sent.id).await.unwrap(), Some(sent.clone()));
  assert_eq!(s.list_messages(case.id).await.unwrap(), vec![sent]);
  assert!(s.get_message(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn message_for_unknown_case_is_rejected() {
  let s = store().await;
  assert!(s.insert_message(message(Uuid::new_v4(), 0, "hello")).await.is_err());
}

#[tokio::test]
async fn duplicate_message_id_is_rejected() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  let sent = s.insert_message(message(case.id, 0, "hello")).await.unwrap();
  assert!(s.insert_message(sent).await.is_err());
  assert_eq!(s.list_messages(case.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn messages_cannot_be_rewritten() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  s.insert_message(message(case.id, 0, "hello")).await.unwrap();

  let result = s
    .conn
    .call(|conn| {
      conn.execute("UPDATE messages SET text = 'edited'", [])?;
      Ok(())
    })
    .await;
  assert!(result.is_err());

  let result = s
    .conn
    .call(|conn| {
      conn.execute("DELETE FROM messages", [])?;
      Ok(())
    })
    .await;
  assert!(result.is_err());
  assert_eq!(s.list_messages(case.id).await.unwrap()[0].text, "hello");
}

// ─── Change feed ─────────────────────────────────────────────────────────────

async fn next_event(stream: &mut crate::FeedStream) -> ChannelSignal {
  tokio::time::timeout(std::time::Duration::from_secs(5), stream.next_signal())
    .await
    .expect("signal within timeout")
    .expect("feed still open")
}

#[tokio::test]
async fn writes_are_published_to_matching_subscribers() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  let other = s.insert_case(new_case("John Roe")).await.unwrap();

  let mut case_stream = s.subscribe(EntityKind::Case, Predicate::Id(case.id));
  let mut thread_stream = s.subscribe(EntityKind::Message, Predicate::CaseId(case.id));

  s.update_case(other.id, patch(CaseStatus::ResponderAvailable, None))
    .await
    .unwrap();
  s.update_case(case.id, patch(CaseStatus::ResponderAvailable, None))
    .await
    .unwrap();
  let sent = s.insert_message(message(case.id, 0, "hello")).await.unwrap();

  let ChannelSignal::Event(event) = next_event(&mut case_stream).await else {
    panic!("expected an event");
  };
  assert_eq!(event.operation, Operation::Update);
  assert_eq!(event.predicate, Predicate::Id(case.id));
  assert!(matches!(
    event.record,
    Record::Case(c) if c.id == case.id && c.status == CaseStatus::ResponderAvailable
  ));

  assert_eq!(
    next_event(&mut thread_stream).await,
    ChannelSignal::Event(consult_core::event::ChangeEvent {
      operation: Operation::Insert,
      record:    Record::Message(sent),
      predicate: Predicate::CaseId(case.id),
    })
  );
}

#[tokio::test]
async fn interrupted_feed_drops_changes_and_signals_reconnect() {
  let s = store().await;
  let case = s.insert_case(new_case("Jane Doe")).await.unwrap();
  let mut stream = s.subscribe(EntityKind::Case, Predicate::Id(case.id));

  s.feed().interrupt();
  assert!(!s.feed().is_connected());
  s.update_case(case.id, patch(CaseStatus::ResponderAvailable, None))
    .await
    .unwrap();
  s.feed().restore();

  assert_eq!(next_event(&mut stream).await, ChannelSignal::Disconnected);
  assert_eq!(next_event(&mut stream).await, ChannelSignal::Reconnected);

  s.update_case(case.id, patch(CaseStatus::InSession, None))
    .await
    .unwrap();
  let ChannelSignal::Event(event) = next_event(&mut stream).await else {
    panic!("expected an event after reconnect");
  };
  assert!(matches!(event.record, Record::Case(c) if c.status == CaseStatus::InSession));
}

#[tokio::test]
async fn dropping_a_stream_unsubscribes() {
  let s = store().await;
  let stream = s.subscribe(EntityKind::Case, Predicate::All);
  let _kept = s.subscribe(EntityKind::Message, Predicate::All);
  assert_eq!(s.feed().subscriber_count(), 2);

  drop(stream);
  assert_eq!(s.feed().subscriber_count(), 1);
}
