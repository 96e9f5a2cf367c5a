//! Injectable wall clock.

use chrono::{DateTime, SubsecRound as _, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The system clock, truncated to microseconds (the precision the store
/// keeps).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }
}
