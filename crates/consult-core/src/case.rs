//! Case types — a patient's intake record and its lifecycle status.
//!
//! A case is the only mutable entity in the system, and the only field that
//! ever changes after creation is its status (together with the `version` and
//! `updated_at` stamps that accompany every status write).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{Error, Result};

/// Upper bound accepted for `age` at intake.
pub const MAX_AGE: u32 = 150;

// ─── Enums ───────────────────────────────────────────────────────────────────

/// How urgent the patient considers their case.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UrgencyLevel {
  Low,
  #[default]
  Medium,
  High,
  Emergency,
}

/// Lifecycle status of a case. Legal moves between statuses are defined in
/// [`crate::lifecycle`].
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CaseStatus {
  #[default]
  Waiting,
  ResponderAvailable,
  InSession,
  Closed,
}

// ─── Case ────────────────────────────────────────────────────────────────────

/// A persisted intake case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
  pub id:                  Uuid,
  pub name:                String,
  pub age:                 u32,
  pub gender:              String,
  /// Order-insensitive; a `BTreeSet` makes equality and serialisation stable.
  pub common_symptoms:     BTreeSet<String>,
  pub additional_symptoms: Option<String>,
  pub urgency_level:       UrgencyLevel,
  pub status:              CaseStatus,
  /// Store-assigned stamp, incremented by every persisted update.
  pub version:             u64,
  pub created_at:          DateTime<Utc>,
  pub updated_at:          DateTime<Utc>,
}

impl Case {
  /// Whether `self` is a newer write of the same case than `other`.
  ///
  /// The version is assigned by the store in commit order, so it orders
  /// `updated_at` without trusting any client clock; `updated_at` only breaks
  /// ties between records that never went through the same store.
  pub fn supersedes(&self, other: &Case) -> bool {
    (self.version, self.updated_at) > (other.version, other.updated_at)
  }
}

// ─── Intake ──────────────────────────────────────────────────────────────────

/// Unvalidated input to case creation, as submitted by the patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseIntake {
  #[serde(default)]
  pub name:                String,
  pub age:                 Option<u32>,
  #[serde(default)]
  pub gender:              String,
  #[serde(default)]
  pub common_symptoms:     BTreeSet<String>,
  pub additional_symptoms: Option<String>,
  pub urgency_level:       Option<UrgencyLevel>,
}

impl CaseIntake {
  /// Validate the intake and build the initial [`Case`] record.
  ///
  /// Blank symptom entries are dropped and free text is trimmed before the
  /// "at least one symptom" rule is checked.
  pub fn into_case(self, id: Uuid, now: DateTime<Utc>) -> Result<Case> {
    let name = self.name.trim().to_owned();
    if name.is_empty() {
      return Err(Error::Validation("name is required".into()));
    }

    let age = self
      .age
      .ok_or_else(|| Error::Validation("age is required".into()))?;
    if age > MAX_AGE {
      return Err(Error::Validation(format!("age {age} is out of range")));
    }

    let gender = self.gender.trim().to_owned();
    if gender.is_empty() {
      return Err(Error::Validation("gender is required".into()));
    }

    let common_symptoms: BTreeSet<String> = self
      .common_symptoms
      .into_iter()
      .map(|s| s.trim().to_owned())
      .filter(|s| !s.is_empty())
      .collect();
    let additional_symptoms = self
      .additional_symptoms
      .map(|s| s.trim().to_owned())
      .filter(|s| !s.is_empty());

    if common_symptoms.is_empty() && additional_symptoms.is_none() {
      return Err(Error::Validation(
        "at least one symptom or a symptom description is required".into(),
      ));
    }

    Ok(Case {
      id,
      name,
      age,
      gender,
      common_symptoms,
      additional_symptoms,
      urgency_level: self.urgency_level.unwrap_or_default(),
      status: CaseStatus::Waiting,
      version: 1,
      created_at: now,
      updated_at: now,
    })
  }
}

// ─── Store inputs ────────────────────────────────────────────────────────────

/// Parameters for [`crate::store::RecordStore::list_cases`].
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
  pub status: Option<CaseStatus>,
  pub limit:  Option<usize>,
}

/// A status write against a stored case.
#[derive(Debug, Clone)]
pub struct CasePatch {
  pub status:           CaseStatus,
  pub updated_at:       DateTime<Utc>,
  /// When set, the write only applies if the stored version still matches.
  pub expected_version: Option<u64>,
}

/// Outcome of [`crate::store::RecordStore::update_case`].
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
  Applied(Case),
  /// No case with that id exists.
  Missing,
  /// `expected_version` did not match; carries the current record.
  Stale(Case),
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn intake() -> CaseIntake {
    CaseIntake {
      name:                "Jane Doe".into(),
      age:                 Some(30),
      gender:              "female".into(),
      common_symptoms:     ["Fever".to_owned(), "Cough".to_owned()].into(),
      additional_symptoms: None,
      urgency_level:       Some(UrgencyLevel::High),
    }
  }

  fn now() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

  #[test]
  fn valid_intake_starts_waiting() {
    let case = intake().into_case(Uuid::new_v4(), now()).unwrap();
    assert_eq!(case.status, CaseStatus::Waiting);
    assert_eq!(case.version, 1);
    assert_eq!(case.created_at, case.updated_at);
    assert_eq!(case.urgency_level, UrgencyLevel::High);
  }

  #[test]
  fn symptom_order_does_not_affect_equality() {
    let id = Uuid::new_v4();
    let a = intake().into_case(id, now()).unwrap();
    let mut reordered = intake();
    reordered.common_symptoms = ["Cough".to_owned(), "Fever".to_owned()].into();
    let b = reordered.into_case(id, now()).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn missing_required_fields_are_rejected() {
    let mut no_name = intake();
    no_name.name = "   ".into();
    assert!(matches!(
      no_name.into_case(Uuid::new_v4(), now()),
      Err(Error::Validation(_))
    ));

    let mut no_age = intake();
    no_age.age = None;
    assert!(matches!(
      no_age.into_case(Uuid::new_v4(), now()),
      Err(Error::Validation(_))
    ));

    let mut no_gender = intake();
    no_gender.gender.clear();
    assert!(matches!(
      no_gender.into_case(Uuid::new_v4(), now()),
      Err(Error::Validation(_))
    ));
  }

  #[test]
  fn symptoms_may_come_from_free_text_alone() {
    let mut only_text = intake();
    only_text.common_symptoms.clear();
    only_text.additional_symptoms = Some("  sharp pain in left knee ".into());
    let case = only_text.into_case(Uuid::new_v4(), now()).unwrap();
    assert_eq!(
      case.additional_symptoms.as_deref(),
      Some("sharp pain in left knee")
    );

    let mut neither = intake();
    neither.common_symptoms = [" ".to_owned()].into();
    neither.additional_symptoms = Some("\t".into());
    assert!(matches!(
      neither.into_case(Uuid::new_v4(), now()),
      Err(Error::Validation(_))
    ));
  }

  #[test]
  fn urgency_defaults_to_medium() {
    let mut unset = intake();
    unset.urgency_level = None;
    let case = unset.into_case(Uuid::new_v4(), now()).unwrap();
    assert_eq!(case.urgency_level, UrgencyLevel::Medium);
  }

  #[test]
  fn higher_version_supersedes() {
    let old = intake().into_case(Uuid::new_v4(), now()).unwrap();
    let mut new = old.clone();
    new.version = 2;
    new.status = CaseStatus::ResponderAvailable;
    assert!(new.supersedes(&old));
    assert!(!old.supersedes(&new));
    assert!(!old.supersedes(&old));
  }

  #[test]
  fn status_strings_are_snake_case() {
    assert_eq!(CaseStatus::ResponderAvailable.to_string(), "responder_available");
    assert_eq!(
      "in_session".parse::<CaseStatus>().unwrap(),
      CaseStatus::InSession
    );
    assert_eq!(
      serde_json::to_string(&CaseStatus::InSession).unwrap(),
      "\"in_session\""
    );
  }
}
