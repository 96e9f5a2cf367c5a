//! Runtime configuration for the synchronization core.
//!
//! Every field has a default matching the legacy behaviour, so an empty
//! `[sync]` table (or none at all) deserialises to a working setup.

use std::time::Duration;

use serde::Deserialize;

/// The canned prompts the simulated responder picks from.
pub const DEFAULT_TEMPLATES: &[&str] = &[
  "Thank you for sharing that information. Can you tell me more about when these symptoms started?",
  "I understand. Have you experienced any similar symptoms before?",
  "That's helpful information. Are there any activities that make the symptoms better or worse?",
  "I see. On a scale of 1-10, how would you rate your current discomfort level?",
  "Thank you for the details. Based on what you've shared, I'd like to ask a few follow-up questions.",
  "I appreciate you being thorough. Are you currently taking any medications?",
  "That gives me a good understanding. Have you noticed any patterns with these symptoms?",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub responder:   ResponderConfig,
  pub concurrency: ConcurrencyMode,
  pub retry:       RetryConfig,
}

/// The simulated responder that answers patient messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
  pub enabled:                 bool,
  pub min_delay_ms:            u64,
  pub max_delay_ms:            u64,
  /// Cancel pending synthetic replies once a human responder writes.
  pub suppress_on_human_reply: bool,
  pub templates:               Vec<String>,
}

impl Default for ResponderConfig {
  fn default() -> Self {
    Self {
      enabled:                 true,
      min_delay_ms:            2000,
      max_delay_ms:            4000,
      suppress_on_human_reply: false,
      templates:               DEFAULT_TEMPLATES.iter().map(|t| (*t).to_owned()).collect(),
    }
  }
}

impl ResponderConfig {
  /// The delay bounds, swapped if configured backwards.
  pub fn delay_bounds(&self) -> (Duration, Duration) {
    let (lo, hi) = if self.min_delay_ms <= self.max_delay_ms {
      (self.min_delay_ms, self.max_delay_ms)
    } else {
      (self.max_delay_ms, self.min_delay_ms)
    };
    (Duration::from_millis(lo), Duration::from_millis(hi))
  }
}

/// How concurrent status writes are arbitrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
  /// Compare-and-swap on the case version; a lost race is a `Conflict`.
  #[default]
  Versioned,
  /// Unconditional writes; the last one persisted wins.
  LastWriteWins,
}

/// Bounded exponential backoff for reads that back reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Total tries, including the first. Zero behaves like one.
  pub attempts:      u32,
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self { Self { attempts: 3, base_delay_ms: 200 } }
}

impl RetryConfig {
  /// Backoff before retry number `retry` (1-based).
  pub fn backoff(&self, retry: u32) -> Duration {
    let factor = 1u64 << retry.saturating_sub(1).min(16);
    Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_legacy_behaviour() {
    let cfg = SyncConfig::default();
    assert!(cfg.responder.enabled);
    assert!(!cfg.responder.suppress_on_human_reply);
    assert_eq!(
      cfg.responder.delay_bounds(),
      (Duration::from_millis(2000), Duration::from_millis(4000))
    );
    assert_eq!(cfg.responder.templates.len(), 7);
    assert_eq!(cfg.concurrency, ConcurrencyMode::Versioned);
  }

  #[test]
  fn backwards_bounds_are_swapped() {
    let cfg = ResponderConfig { min_delay_ms: 50, max_delay_ms: 10, ..Default::default() };
    assert_eq!(
      cfg.delay_bounds(),
      (Duration::from_millis(10), Duration::from_millis(50))
    );
  }

  #[test]
  fn backoff_doubles() {
    let retry = RetryConfig { attempts: 4, base_delay_ms: 100 };
    assert_eq!(retry.backoff(1), Duration::from_millis(100));
    assert_eq!(retry.backoff(2), Duration::from_millis(200));
    assert_eq!(retry.backoff(3), Duration::from_millis(400));
  }
}
