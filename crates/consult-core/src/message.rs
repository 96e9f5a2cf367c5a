//! Messages and the ordered, append-only message log.
//!
//! Messages are immutable once written. A [`MessageLog`] is the in-memory
//! form of one case's thread: always sorted by [`MessageKey`] and holding each
//! message identity at most once, however many times it was delivered.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Which side of the consultation wrote a message.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SenderRole {
  Patient,
  Responder,
}

/// One immutable entry in a case's consultation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub id:        Uuid,
  pub case_id:   Uuid,
  pub sender:    SenderRole,
  pub text:      String,
  pub timestamp: DateTime<Utc>,
}

impl Message {
  /// Build a new message, trimming `text`. Returns `None` when nothing is
  /// left to send.
  pub fn compose(
    case_id: Uuid,
    sender: SenderRole,
    text: &str,
    timestamp: DateTime<Utc>,
  ) -> Option<Self> {
    let text = text.trim();
    if text.is_empty() {
      return None;
    }
    Some(Self {
      id: Uuid::new_v4(),
      case_id,
      sender,
      text: text.to_owned(),
      timestamp,
    })
  }

  pub fn key(&self) -> MessageKey {
    MessageKey { timestamp: self.timestamp, id: self.id }
  }
}

/// Total order over messages: timestamp first, identity breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
  pub timestamp: DateTime<Utc>,
  pub id:        Uuid,
}

// ─── MessageLog ──────────────────────────────────────────────────────────────

/// A sorted, de-duplicated message thread.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
  entries: BTreeMap<MessageKey, Message>,
  ids:     HashSet<Uuid>,
}

impl MessageLog {
  pub fn new() -> Self { Self::default() }

  /// Insert `message` unless its identity is already present.
  ///
  /// Returns `true` if the log changed.
  pub fn insert(&mut self, message: Message) -> bool {
    if !self.ids.insert(message.id) {
      return false;
    }
    self.entries.insert(message.key(), message);
    true
  }

  pub fn contains(&self, id: Uuid) -> bool { self.ids.contains(&id) }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &Message> { self.entries.values() }

  pub fn last(&self) -> Option<&Message> {
    self.entries.last_key_value().map(|(_, m)| m)
  }

  pub fn to_vec(&self) -> Vec<Message> { self.iter().cloned().collect() }
}

impl Extend<Message> for MessageLog {
  fn extend<I: IntoIterator<Item = Message>>(&mut self, iter: I) {
    for message in iter {
      self.insert(message);
    }
  }
}

impl FromIterator<Message> for MessageLog {
  fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
    let mut log = Self::new();
    log.extend(iter);
    log
  }
}
