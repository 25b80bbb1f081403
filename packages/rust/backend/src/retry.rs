//! Transport-level retry for completion calls.
//!
//! Only network failures, timeouts, non-2xx statuses, and malformed response
//! bodies pass through here. Output that arrives intact but fails structural
//! validation is retried by the engines, with their own budget.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use quizforge_shared::{BackoffConfig, BackoffPolicy, LlmConfig, QuizError, Result};

/// Attempt budget and delay curve for one completion call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub attempts: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(llm: &LlmConfig) -> Self {
        Self::new(llm.llm_retries, llm.backoff.clone())
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.base_delay_ms;
        let ms = match self.backoff.policy {
            BackoffPolicy::Fixed => base,
            BackoffPolicy::Exponential => base.saturating_mul(1u64 << attempt.min(32)),
        };
        Duration::from_millis(ms.min(self.backoff.max_delay_ms))
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// `operation` receives the 0-based attempt number and reports failures as
/// plain messages; the last one is surfaced as [`QuizError::Transport`].
pub async fn with_transport_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let mut last_err = String::new();
    for attempt in 0..policy.attempts {
        match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => {
                last_err = e;
                if attempt + 1 == policy.attempts {
                    break;
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %last_err,
                    "retrying completion after transport error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(QuizError::transport(policy.attempts, last_err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32, policy: BackoffPolicy) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            BackoffConfig {
                policy,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
            },
        )
    }

    fn fast(attempts: u32, policy: BackoffPolicy) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            BackoffConfig {
                policy,
                base_delay_ms: 1,
                max_delay_ms: 4,
            },
        )
    }

    #[test]
    fn exponential_delays_double_and_cap() {
        let p = policy(5, BackoffPolicy::Exponential);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn fixed_delays_stay_flat() {
        let p = policy(5, BackoffPolicy::Fixed);
        assert_eq!(p.delay_for(0), p.delay_for(3));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(policy(0, BackoffPolicy::Fixed).attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = with_transport_retry(&fast(3, BackoffPolicy::Exponential), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection refused".to_string())
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(out, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let calls = AtomicU32::new(0);
        let err = with_transport_retry(&fast(3, BackoffPolicy::Fixed), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(format!("HTTP 503 on attempt {attempt}")) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            QuizError::Transport { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("attempt 2"));
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }
}
