//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with exactly six fractional
//! digits and a `Z` suffix. Enum columns hold their snake_case names. The
//! symptom set is stored as a JSON array. UUIDs are stored as hyphenated
//! lowercase strings, whose text order matches `Uuid`'s byte order.

use std::{collections::BTreeSet, str::FromStr};

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use consult_core::{
  case::{Case, CaseStatus, UrgencyLevel},
  message::{Message, SenderRole},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

/// Drop precision the column cannot hold, so values read back compare equal.
pub fn normalize_dt(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::Decode { column, value: s.to_owned() })
}

pub fn encode_status(s: CaseStatus) -> &'static str { s.into() }

pub fn decode_status(s: &str) -> Result<CaseStatus> { decode_enum("status", s) }

pub fn encode_urgency(u: UrgencyLevel) -> &'static str { u.into() }

pub fn encode_sender(s: SenderRole) -> &'static str { s.into() }

// ─── Symptoms ────────────────────────────────────────────────────────────────

pub fn encode_symptoms(symptoms: &BTreeSet<String>) -> Result<String> {
  Ok(serde_json::to_string(symptoms)?)
}

pub fn decode_symptoms(s: &str) -> Result<BTreeSet<String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawCase::from_row`].
pub const CASE_COLUMNS: &str = "case_id, name, age, gender, common_symptoms, \
  additional_symptoms, urgency_level, status, version, created_at, updated_at";

/// Raw values read directly from a `cases` row.
pub struct RawCase {
  pub case_id:             String,
  pub name:                String,
  pub age:                 i64,
  pub gender:              String,
  pub common_symptoms:     String,
  pub additional_symptoms: Option<String>,
  pub urgency_level:       String,
  pub status:              String,
  pub version:             i64,
  pub created_at:          String,
  pub updated_at:          String,
}

impl RawCase {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      case_id:             row.get(0)?,
      name:                row.get(1)?,
      age:                 row.get(2)?,
      gender:              row.get(3)?,
      common_symptoms:     row.get(4)?,
      additional_symptoms: row.get(5)?,
      urgency_level:       row.get(6)?,
      status:              row.get(7)?,
      version:             row.get(8)?,
      created_at:          row.get(9)?,
      updated_at:          row.get(10)?,
    })
  }

  pub fn into_case(self) -> Result<Case> {
    let age = u32::try_from(self.age).map_err(|_| Error::Decode {
      column: "age",
      value:  self.age.to_string(),
    })?;
    let version = u64::try_from(self.version).map_err(|_| Error::Decode {
      column: "version",
      value:  self.version.to_string(),
    })?;

    Ok(Case {
      id: decode_uuid(&self.case_id)?,
      name: self.name,
      age,
      gender: self.gender,
      common_symptoms: decode_symptoms(&self.common_symptoms)?,
      additional_symptoms: self.additional_symptoms,
      urgency_level: decode_enum("urgency_level", &self.urgency_level)?,
      status: decode_status(&self.status)?,
      version,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Column list matching [`RawMessage::from_row`].
pub const MESSAGE_COLUMNS: &str = "message_id, case_id, sender, text, timestamp";

/// Raw strings read directly from a `messages` row.
pub struct RawMessage {
  pub message_id: String,
  pub case_id:    String,
  pub sender:     String,
  pub text:       String,
  pub timestamp:  String,
}

impl RawMessage {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      message_id: row.get(0)?,
      case_id:    row.get(1)?,
      sender:     row.get(2)?,
      text:       row.get(3)?,
      timestamp:  row.get(4)?,
    })
  }

  pub fn into_message(self) -> Result<Message> {
    Ok(Message {
      id:        decode_uuid(&self.message_id)?,
      case_id:   decode_uuid(&self.case_id)?,
      sender:    decode_enum("sender", &self.sender)?,
      text:      self.text,
      timestamp: decode_dt(&self.timestamp)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_timestamps_sort_like_time() {
    let a = Utc.timestamp_opt(1_700_000_000, 5_000).unwrap();
    let b = Utc.timestamp_opt(1_700_000_000, 40_000_000).unwrap();
    let c = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
    let mut encoded = vec![encode_dt(c), encode_dt(a), encode_dt(b)];
    encoded.sort();
    assert_eq!(encoded, vec![encode_dt(a), encode_dt(b), encode_dt(c)]);
    assert!(encode_dt(c).ends_with('Z'));
  }

  #[test]
  fn normalized_timestamps_survive_the_column() {
    let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let stored = normalize_dt(dt);
    assert_eq!(decode_dt(&encode_dt(stored)).unwrap(), stored);
  }

  #[test]
  fn unknown_enum_strings_are_decode_errors() {
    assert!(matches!(
      decode_status("discharged"),
      Err(Error::Decode { column: "status", .. })
    ));
  }
}
