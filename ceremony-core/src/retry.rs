//! Bounded retry with exponential backoff for transport failures.
//!
//! The policy is pure (no clock, no scheduler); the async driver is the
//! caller's control loop. Only transient transport errors are ever retried:
//! `VerificationFailed`, `AlreadyConsumed` and `Superseded` surface directly,
//! since retrying them would paper over a failed ceremony or a concurrency
//! race the caller must see.

use std::future::Future;
use std::time::Duration;

use crate::error::{CeremonyError, Result};
use crate::traits::TransportCollaborator;

/// Maximum attempts before `RetriesExhausted`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval,
            max_interval,
        }
    }

    /// Whether another attempt is allowed after `attempt_count` failures.
    pub fn should_retry(&self, error: &CeremonyError, attempt_count: u32) -> bool {
        error.is_transient() && attempt_count < self.max_attempts
    }

    /// Delay before the retry following `attempt_count` failed attempts.
    /// Doubles from the initial interval, capped at the maximum.
    pub fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(16);
        let delay = self.initial_interval.saturating_mul(1 << exponent);
        delay.min(self.max_interval)
    }

    /// Drive `op` until it succeeds, fails permanently, or the attempt bound
    /// is hit.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt_count = 0;
        loop {
            attempt_count += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error, attempt_count) => {
                    let delay = self.backoff_delay(attempt_count);
                    tracing::warn!(
                        error = %error,
                        attempt = attempt_count,
                        retry_after_ms = delay.as_millis() as u64,
                        "Retry scheduled"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) if error.is_transient() => {
                    tracing::warn!(error = %error, attempts = attempt_count, "Retries exhausted");
                    return Err(CeremonyError::RetriesExhausted(attempt_count));
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Send a payload over the transport, retrying transient failures.
    pub async fn send_with_retry(
        &self,
        transport: &dyn TransportCollaborator,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.run(|| transport.send(payload.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that times out a fixed number of times before succeeding.
    struct FlakyTransport {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn failing(times: u32) -> Self {
            Self {
                failures: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TransportCollaborator for FlakyTransport {
        async fn send(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let remaining = self.failures.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::Relaxed);
                return Err(CeremonyError::TransportTimeout("simulated".into()));
            }
            Ok(payload)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(100))
    }

    #[test]
    fn test_should_retry_respects_attempt_bound() {
        let policy = RetryPolicy::default();
        let timeout = CeremonyError::TransportTimeout("connect".into());

        assert!(policy.should_retry(&timeout, 1));
        assert!(policy.should_retry(&timeout, 2));
        assert!(!policy.should_retry(&timeout, 3));
        assert!(!policy.should_retry(&timeout, 4));
    }

    #[test]
    fn test_terminal_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&CeremonyError::VerificationFailed("sig".into()), 1));
        assert!(!policy.should_retry(&CeremonyError::AlreadyConsumed, 1));
        assert!(!policy.should_retry(&CeremonyError::Superseded, 1));
    }

    #[test]
    fn test_backoff_delay_strictly_increases_below_cap() {
        let policy = RetryPolicy::default();
        let d1 = policy.backoff_delay(1);
        let d2 = policy.backoff_delay(2);
        let d3 = policy.backoff_delay(3);

        assert!(d1 < d2 && d2 < d3);
        assert!(d3 <= Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_delay_caps_at_max_interval() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_driver_recovers_from_transient_failures() {
        let transport = FlakyTransport::failing(2);
        let payload = serde_json::json!({ "ceremony_id": "c1" });

        let ack = fast_policy()
            .send_with_retry(&transport, &payload)
            .await
            .unwrap();
        assert_eq!(ack, payload);
        assert_eq!(transport.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_driver_surfaces_retries_exhausted() {
        let transport = FlakyTransport::failing(10);
        let payload = serde_json::json!({});

        let err = fast_policy()
            .send_with_retry(&transport, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::RetriesExhausted(3)));
        assert_eq!(transport.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_driver_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let err = fast_policy()
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(CeremonyError::VerificationFailed("sig".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::VerificationFailed(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
