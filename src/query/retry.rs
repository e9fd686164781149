use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ApiError;

pub const QUERY_RETRIES: u32 = 2;
pub const MUTATION_RETRIES: u32 = 1;

/// How many times a failed request is re-issued, and how long to wait.
///
/// Only [`ApiError::is_retryable`] errors are retried. The wait before
/// attempt `n + 1` is `min(base_delay * 2^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  pub const fn new(max_retries: u32) -> Self {
    Self {
      max_retries,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }

  pub const fn queries() -> Self {
    Self::new(QUERY_RETRIES)
  }

  pub const fn mutations() -> Self {
    Self::new(MUTATION_RETRIES)
  }

  pub const fn none() -> Self {
    Self::new(0)
  }

  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Run `op`, re-running it on retryable failures.
  pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ApiError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_retryable() && attempt < self.max_retries => {
          let delay = self.delay_for(attempt);
          warn!(attempt = attempt + 1, ?delay, error = %e, "Retrying request");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::queries()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  async fn run_counting(policy: RetryPolicy, error: ApiError) -> (Result<(), ApiError>, u32) {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let result = policy
      .run(|| {
        let counter = counter.clone();
        let error = error.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err::<(), _>(error)
        }
      })
      .await;
    (result, attempts.load(Ordering::SeqCst))
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_errors_retry_twice_for_queries() {
    let (result, attempts) =
      run_counting(RetryPolicy::queries(), ApiError::transient(None, "offline")).await;
    assert!(result.is_err());
    assert_eq!(attempts, 3);

    let (_, attempts) =
      run_counting(RetryPolicy::queries(), ApiError::transient(Some(500), "boom")).await;
    assert_eq!(attempts, 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutations_retry_once() {
    let (_, attempts) =
      run_counting(RetryPolicy::mutations(), ApiError::transient(Some(502), "bad gateway")).await;
    assert_eq!(attempts, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_client_errors_never_retry() {
    let (_, attempts) = run_counting(
      RetryPolicy::queries(),
      ApiError::Auth {
        message: "expired".into(),
      },
    )
    .await;
    assert_eq!(attempts, 1);

    let (_, attempts) =
      run_counting(RetryPolicy::queries(), ApiError::request(Some(404), "missing")).await;
    assert_eq!(attempts, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_recovers_after_transient_failure() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let result = RetryPolicy::queries()
      .run(|| {
        let counter = counter.clone();
        async move {
          if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ApiError::transient(None, "blip"))
          } else {
            Ok(7)
          }
        }
      })
      .await;
    assert_eq!(result, Ok(7));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_backoff_is_capped() {
    let policy = RetryPolicy::queries();
    assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for(10), Duration::from_secs(30));
  }
}
