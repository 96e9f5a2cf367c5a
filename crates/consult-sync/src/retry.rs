//! Bounded retry with exponential backoff.

use std::future::Future;

use consult_core::Result;

use crate::config::RetryConfig;

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let attempts = policy.attempts.max(1);
  let mut retry = 0;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_transient() && retry + 1 < attempts => {
        retry += 1;
        let delay = policy.backoff(retry);
        tracing::warn!(error = %e, retry, ?delay, "{what} failed; retrying");
        tokio::time::sleep(delay).await;
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;
  use consult_core::Error;

  fn transient() -> Error { Error::store(std::io::Error::other("connection reset")) }

  #[tokio::test]
  async fn retries_transient_failures_until_success() {
    let calls = AtomicU32::new(0);
    let policy = RetryConfig { attempts: 3, base_delay_ms: 1 };
    let result = with_retry(&policy, "load", || async {
      if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(transient()) } else { Ok(7) }
    })
    .await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn gives_up_after_the_budget() {
    let calls = AtomicU32::new(0);
    let policy = RetryConfig { attempts: 2, base_delay_ms: 1 };
    let result: Result<()> = with_retry(&policy, "load", || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Err(transient())
    })
    .await;
    assert!(matches!(result, Err(Error::Store(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn terminal_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let policy = RetryConfig { attempts: 5, base_delay_ms: 1 };
    let result: Result<()> = with_retry(&policy, "load", || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Err(Error::CaseNotFound(uuid::Uuid::nil()))
    })
    .await;
    assert!(matches!(result, Err(Error::CaseNotFound(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
