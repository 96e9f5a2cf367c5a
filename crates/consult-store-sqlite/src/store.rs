//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`] and
//! [`NotificationChannel`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use consult_core::{
  case::{Case, CaseFilter, CasePatch, UpdateOutcome},
  channel::NotificationChannel,
  event::{EntityKind, Operation, Predicate, Record},
  message::Message,
  store::RecordStore,
};

use crate::{
  Error, Result,
  encode::{
    CASE_COLUMNS, MESSAGE_COLUMNS, RawCase, RawMessage, encode_dt, encode_sender,
    encode_status, encode_symptoms, encode_urgency, encode_uuid, normalize_dt,
  },
  error::in_call,
  feed::{ChangeFeed, FeedStream},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Consult record store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection and the change feed are
/// reference-counted and shared between clones.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  feed: ChangeFeed,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, feed: ChangeFeed::new() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, feed: ChangeFeed::new() };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The change feed this store publishes to.
  pub fn feed(&self) -> &ChangeFeed { &self.feed }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  // ── Cases ─────────────────────────────────────────────────────────────────

  async fn insert_case(&self, mut case: Case) -> Result<Case> {
    case.created_at = normalize_dt(case.created_at);
    case.updated_at = normalize_dt(case.updated_at);

    let id_str       = encode_uuid(case.id);
    let symptoms_str = encode_symptoms(&case.common_symptoms)?;
    let urgency_str  = encode_urgency(case.urgency_level);
    let status_str   = encode_status(case.status);
    let created_str  = encode_dt(case.created_at);
    let updated_str  = encode_dt(case.updated_at);
    let version      = i64::try_from(case.version).map_err(|_| Error::Decode {
      column: "version",
      value:  case.version.to_string(),
    })?;

    let feed = self.feed.clone();
    let record = case.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cases (
             case_id, name, age, gender, common_symptoms, additional_symptoms,
             urgency_level, status, version, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            id_str,
            record.name,
            record.age,
            record.gender,
            symptoms_str,
            record.additional_symptoms,
            urgency_str,
            status_str,
            version,
            created_str,
            updated_str,
          ],
        )?;
        feed.publish(Operation::Insert, Record::Case(record));
        Ok(())
      })
      .await?;

    Ok(case)
  }

  async fn get_case(&self, id: Uuid) -> Result<Option<Case>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawCase> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CASE_COLUMNS} FROM cases WHERE case_id = ?1"),
              rusqlite::params![id_str],
              RawCase::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCase::into_case).transpose()
  }

  async fn list_cases(&self, filter: &CaseFilter) -> Result<Vec<Case>> {
    let status_str = filter.status.map(encode_status);
    // SQLite treats a negative LIMIT as "no limit".
    let limit_val  = filter.limit.map_or(-1, |l| l as i64);

    let raws: Vec<RawCase> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CASE_COLUMNS} FROM cases
           WHERE (?1 IS NULL OR status = ?1)
           ORDER BY created_at DESC, case_id
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![status_str, limit_val], RawCase::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCase::into_case).collect()
  }

  async fn update_case(&self, id: Uuid, patch: CasePatch) -> Result<UpdateOutcome> {
    let id_str     = encode_uuid(id);
    let status_str = encode_status(patch.status);
    let at_str     = encode_dt(normalize_dt(patch.updated_at));
    let expected   = patch.expected_version.map(|v| v as i64);
    let feed       = self.feed.clone();

    let outcome = self
      .conn
      .call(move |conn| {
        // `MAX` keeps `updated_at` from ever moving backwards, whatever the
        // writer's clock says.
        let updated = conn
          .query_row(
            &format!(
              "UPDATE cases
               SET status     = ?2,
                   updated_at = MAX(updated_at, ?3),
                   version    = version + 1
               WHERE case_id = ?1 AND (?4 IS NULL OR version = ?4)
               RETURNING {CASE_COLUMNS}"
            ),
            rusqlite::params![id_str, status_str, at_str, expected],
            RawCase::from_row,
          )
          .optional()?;

        if let Some(raw) = updated {
          let case = raw.into_case().map_err(in_call)?;
          feed.publish(Operation::Update, Record::Case(case.clone()));
          return Ok(UpdateOutcome::Applied(case));
        }

        let current = conn
          .query_row(
            &format!("SELECT {CASE_COLUMNS} FROM cases WHERE case_id = ?1"),
            rusqlite::params![id_str],
            RawCase::from_row,
          )
          .optional()?;

        match current {
          Some(raw) => Ok(UpdateOutcome::Stale(raw.into_case().map_err(in_call)?)),
          None => Ok(UpdateOutcome::Missing),
        }
      })
      .await?;

    Ok(outcome)
  }

  // ── Messages — append-only ────────────────────────────────────────────────

  async fn insert_message(&self, mut message: Message) -> Result<Message> {
    message.timestamp = normalize_dt(message.timestamp);

    let id_str      = encode_uuid(message.id);
    let case_id_str = encode_uuid(message.case_id);
    let sender_str  = encode_sender(message.sender);
    let ts_str      = encode_dt(message.timestamp);
    let feed        = self.feed.clone();
    let record      = message.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO messages (message_id, case_id, sender, text, timestamp)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, case_id_str, sender_str, record.text, ts_str],
        )?;
        feed.publish(Operation::Insert, Record::Message(record));
        Ok(())
      })
      .await?;

    Ok(message)
  }

  async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawMessage> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
              rusqlite::params![id_str],
              RawMessage::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawMessage::into_message).transpose()
  }

  async fn list_messages(&self, case_id: Uuid) -> Result<Vec<Message>> {
    let case_id_str = encode_uuid(case_id);

    let raws: Vec<RawMessage> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MESSAGE_COLUMNS} FROM messages
           WHERE case_id = ?1
           ORDER BY timestamp, message_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![case_id_str], RawMessage::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMessage::into_message).collect()
  }
}

// ─── NotificationChannel impl ────────────────────────────────────────────────

impl NotificationChannel for SqliteStore {
  type Stream = FeedStream;

  fn subscribe(&self, kind: EntityKind, predicate: Predicate) -> FeedStream {
    self.feed.subscribe(kind, predicate)
  }
}
