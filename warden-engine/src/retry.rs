//! Retry/backoff wrapper around a single evaluation attempt.
//!
//! A fixed-count exponential backoff policy (fixed attempt count, fixed base delay,
//! doubling, no cap). The wrapper only ever retries [`Pipeline::score_and_verdict`],
//! never the screen: a message that screens as malicious is a deliberate, correct
//! terminal result (see [`Pipeline::screen`]),
//! while a scoring/verdict attempt that errors -- a bad LLM response, a transient
//! transport failure -- is worth retrying with backoff.
//!
//! `max_retries` counts retries *after* the initial attempt: an evaluator that fails on
//! every call is retried 3 times (4 calls total) with delays 1s, 2s, 4s before each retry.

use std::future::Future;
use std::time::Duration;

use crate::error::PipelineError;
use crate::pipeline::PipelineOutput;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier,
        }
    }

    /// Delay before the retry that follows the `attempt`-th failure (0-indexed):
    /// `base * multiplier^attempt`, i.e. `base, 2*base, 4*base, ...` for `multiplier=2`.
    fn delay(&self, attempt: usize) -> Duration {
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs)
    }
}

/// Runs `attempt` once, then up to `policy.max_retries` more times with exponential
/// backoff between each failure, returning the first `Ok` or the last `Err` once the
/// retry budget is exhausted.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<PipelineOutput, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PipelineOutput, PipelineError>>,
{
    let mut last_err: Option<PipelineError> = None;
    for i in 0..=policy.max_retries {
        match attempt().await {
            Ok(output) => return Ok(output),
            Err(e) => {
                tracing::warn!(attempt = i + 1, error = %e, "evaluation attempt failed, will retry");
                last_err = Some(e);
            }
        }
        if i < policy.max_retries {
            tokio::time::sleep(policy.delay(i)).await;
        }
    }
    Err(last_err.expect("the loop runs the initial attempt unconditionally"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn output() -> PipelineOutput {
        PipelineOutput {
            evaluation_score: 0.5,
            topic_scores: vec![],
            action: None,
            embedding: vec![],
        }
    }

    #[test]
    fn policy_delay_matches_exponential_schedule() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_without_sleeping() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let calls = AtomicUsize::new(0);
        let start = Instant::now();
        let result = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(output()) }
        })
        .await
        .unwrap();
        assert_eq!(result.evaluation_score, 0.5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_with_backoff_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let calls = AtomicUsize::new(0);
        let start = Instant::now();
        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::Protocol("transient".to_string()))
                } else {
                    Ok(output())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result.evaluation_score, 0.5);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoffs elapsed before the third (successful) call: 1s then 2s.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    /// An evaluator that always returns empty is retried exactly 3 times, with delays
    /// 1s, 2s, 4s, then dropped.
    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_last_error_after_three_backoffs() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let calls = AtomicUsize::new(0);
        let start = Instant::now();
        let result = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Protocol("boom".to_string())) }
        })
        .await;
        assert!(result.is_err());
        // Initial attempt plus 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s backoffs; paused clock advances exactly, so this is exact
        // rather than approximate.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }
}
