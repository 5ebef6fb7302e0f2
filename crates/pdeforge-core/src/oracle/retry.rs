//! Oracle call controls: per-call timeout, retry with exponential backoff,
//! circuit breaker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{GenerationOracle, OracleError, OracleRequest, OracleResponse};
use crate::metrics::METRICS;

/// Retry settings for one logical oracle call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Wall-clock limit for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            max_retries: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Circuit breaker that opens after N consecutive failures.
///
/// Thread-safe via `AtomicU32`. Resets on success.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold,
        }
    }

    /// `true` once the consecutive failure count reaches the threshold.
    pub fn is_open(&self) -> bool {
        self.failure_count() >= self.threshold
    }

    /// Record a failure. Returns the current consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Call the oracle with timeout and retry controls.
///
/// Transport faults, timeouts and empty responses are retried with
/// exponential backoff; permanent errors return immediately. When every
/// attempt fails the result is [`OracleError::Exhausted`].
pub async fn call_with_retry(
    oracle: &dyn GenerationOracle,
    request: &OracleRequest,
    policy: &RetryPolicy,
) -> Result<OracleResponse, OracleError> {
    let max_attempts = policy.max_retries + 1;
    let limit = Duration::from_millis(policy.timeout_ms);
    let mut last = String::new();

    for attempt in 1..=max_attempts {
        METRICS.inc_oracle_calls();
        if attempt > 1 {
            METRICS.inc_oracle_retries();
        }

        let err = match tokio::time::timeout(limit, oracle.generate(request)).await {
            Ok(Ok(response)) if response.text.trim().is_empty() => OracleError::EmptyResponse,
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => err,
            Err(_elapsed) => OracleError::Timeout {
                limit_ms: policy.timeout_ms,
            },
        };

        warn!(
            oracle = oracle.name(),
            call_id = %request.call_id,
            attempt = attempt,
            max_attempts = max_attempts,
            error = %err,
            "oracle call failed"
        );
        if !err.is_retryable() {
            return Err(err);
        }
        last = err.to_string();

        if attempt < max_attempts {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }

    Err(OracleError::Exhausted {
        attempts: max_attempts,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{ScriptedOracle, ScriptedReply};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout_ms: 1_000,
            max_retries,
            backoff_base_ms: 10,
        }
    }

    #[test]
    fn test_circuit_breaker_opens_at_threshold() {
        let cb = CircuitBreaker::new(3);
        assert!(!cb.is_open());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        assert_eq!(cb.record_failure(), 3);
        assert!(cb.is_open());
    }

    #[test]
    fn test_circuit_breaker_resets_on_success() {
        let cb = CircuitBreaker::new(2);
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert!(!cb.is_open());
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(3);
        assert_eq!(p.backoff(1), Duration::from_millis(10));
        assert_eq!(p.backoff(2), Duration::from_millis(20));
        assert_eq!(p.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn test_policy_serde_defaults() {
        let p: RetryPolicy = toml::from_str("max_retries = 1").expect("parse");
        assert_eq!(p.max_retries, 1);
        assert_eq!(p.timeout_ms, RetryPolicy::default().timeout_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::Fail("connection reset".into()),
            ScriptedReply::Fail("connection reset".into()),
            ScriptedReply::text("```python\nx = 1\n```"),
        ]);
        let request = OracleRequest::new("sys", "prompt");
        let response = call_with_retry(&oracle, &request, &policy(2))
            .await
            .expect("third attempt succeeds");
        assert!(response.text.contains("x = 1"));
        assert_eq!(oracle.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::Fail("503".into()),
            ScriptedReply::Fail("503".into()),
        ]);
        let request = OracleRequest::new("sys", "prompt");
        let err = call_with_retry(&oracle, &request, &policy(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_and_retries() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::Hang,
            ScriptedReply::text("```python\nok = True\n```"),
        ]);
        let request = OracleRequest::new("sys", "prompt");
        let response = call_with_retry(&oracle, &request, &policy(1))
            .await
            .expect("second attempt succeeds");
        assert!(response.text.contains("ok = True"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_retried() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::text("   "),
            ScriptedReply::text("```python\nx = 2\n```"),
        ]);
        let request = OracleRequest::new("sys", "prompt");
        let response = call_with_retry(&oracle, &request, &policy(1)).await.expect("ok");
        assert!(response.text.contains("x = 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let oracle = ScriptedOracle::new(vec![
            ScriptedReply::Status(401),
            ScriptedReply::text("never reached"),
        ]);
        let request = OracleRequest::new("sys", "prompt");
        let err = call_with_retry(&oracle, &request, &policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Status { status: 401, .. }));
        assert_eq!(oracle.requests().len(), 1);
    }
}
