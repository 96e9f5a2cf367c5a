//! Change events and the predicates that select them.

use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::{case::Case, message::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Case,
  Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
  Insert,
  Update,
}

/// A persisted entity of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
  Case(Case),
  Message(Message),
}

impl Record {
  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Case(_) => EntityKind::Case,
      Self::Message(_) => EntityKind::Message,
    }
  }

  pub fn id(&self) -> Uuid {
    match self {
      Self::Case(c) => c.id,
      Self::Message(m) => m.id,
    }
  }

  /// The case this record belongs to; a case belongs to itself.
  pub fn case_id(&self) -> Uuid {
    match self {
      Self::Case(c) => c.id,
      Self::Message(m) => m.case_id,
    }
  }
}

/// Row filter attached to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "on", content = "value", rename_all = "snake_case")]
pub enum Predicate {
  /// The record's own id equals the value.
  Id(Uuid),
  /// The record belongs to the case with this id.
  CaseId(Uuid),
  All,
}

impl Predicate {
  pub fn matches(&self, record: &Record) -> bool {
    match self {
      Self::Id(id) => record.id() == *id,
      Self::CaseId(id) => record.case_id() == *id,
      Self::All => true,
    }
  }
}

/// One change observed on the notification channel. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub operation: Operation,
  pub record:    Record,
  /// The subscription predicate this event was delivered for.
  pub predicate: Predicate,
}

impl ChangeEvent {
  pub fn kind(&self) -> EntityKind { self.record.kind() }
}
