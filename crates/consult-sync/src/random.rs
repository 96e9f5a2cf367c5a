//! Injectable randomness for the simulated responder.

use std::time::Duration;

use rand::Rng as _;

pub trait RandomSource: Send + Sync {
  /// A delay drawn uniformly from `[min, max]`.
  fn delay_between(&self, min: Duration, max: Duration) -> Duration;

  /// An index drawn uniformly from `0..len`. `len` is never zero.
  fn pick(&self, len: usize) -> usize;
}

/// Backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
  fn delay_between(&self, min: Duration, max: Duration) -> Duration {
    let ms = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
  }

  fn pick(&self, len: usize) -> usize { rand::thread_rng().gen_range(0..len) }
}

/// Always the same answer; for deterministic tests and demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
  pub delay: Duration,
  pub index: usize,
}

impl RandomSource for FixedRandom {
  fn delay_between(&self, min: Duration, max: Duration) -> Duration {
    self.delay.clamp(min, max)
  }

  fn pick(&self, len: usize) -> usize { self.index % len }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thread_random_stays_in_bounds() {
    let min = Duration::from_millis(2000);
    let max = Duration::from_millis(4000);
    for _ in 0..500 {
      let d = ThreadRandom.delay_between(min, max);
      assert!(d >= min && d <= max, "{d:?}");
      assert!(ThreadRandom.pick(7) < 7);
    }
    assert_eq!(ThreadRandom.delay_between(min, min), min);
  }

  #[test]
  fn fixed_random_is_clamped() {
    let fixed = FixedRandom { delay: Duration::from_secs(10), index: 9 };
    assert_eq!(
      fixed.delay_between(Duration::from_secs(2), Duration::from_secs(4)),
      Duration::from_secs(4)
    );
    assert_eq!(fixed.pick(7), 2);
  }
}
