use crate::error::ApiError;
use crate::error::ClassifiedError;
use crate::error::ErrorKind;
use rand::Rng;
use std::time::Duration;

/// Backoff policy for transient failures. Delays grow exponentially with a
/// small uniform jitter and are capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

const JITTER_FRACTION: f64 = 0.1;

impl RetryPolicy {
    /// `attempt` is the number of attempts already made. Auth failures are
    /// never retried regardless of what the classifier says: the only fix
    /// for a rejected credential is a new login, not a backoff loop.
    pub fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        if !error.retryable {
            return false;
        }
        if attempt >= self.max_attempts {
            return false;
        }
        if error.kind == ErrorKind::Auth {
            return false;
        }
        true
    }

    /// Delay before retry number `attempt + 1`. Always within
    /// `[base * 2^attempt, base * 2^attempt * 1.1)` until the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(31) as i32);
        let jitter = rand::rng().random_range(0.0..JITTER_FRACTION);
        let delayed = Duration::from_secs_f64(exponential * (1.0 + jitter));
        delayed.min(self.max_delay)
    }
}

/// Terminal result of a retried operation.
#[derive(Debug, Clone)]
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted { error: ClassifiedError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

/// Runs `op` until it succeeds, the policy gives up, or `gate` reports that
/// further attempts are pointless (e.g. the connection is known to be down).
/// Attempts for one call site are strictly sequential: the next attempt
/// never starts before the previous one settled and its backoff elapsed.
pub async fn retry_with_backoff_while<T, F, Fut, G>(
    policy: RetryPolicy,
    gate: G,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    G: Fn() -> bool,
{
    let mut attempts = 0u32;
    loop {
        match op().await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(err) => {
                let classified = ClassifiedError::from(&err);
                attempts += 1;
                if !policy.should_retry(&classified, attempts) || !gate() {
                    tracing::debug!(
                        attempts,
                        kind = ?classified.kind,
                        "giving up after {err}"
                    );
                    return RetryOutcome::Exhausted {
                        error: classified,
                        attempts,
                    };
                }
                let delay = policy.delay_for(attempts - 1);
                tracing::debug!(attempts, ?delay, "retrying after {err}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`retry_with_backoff_while`] with an always-open gate.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    retry_with_backoff_while(policy, || true, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInput;
    use crate::error::classify;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    fn network_error() -> ClassifiedError {
        classify(&FailureInput::new("connect refused", None))
    }

    fn auth_error() -> ClassifiedError {
        classify(&FailureInput::new("unauthorized", Some(401)))
    }

    #[test]
    fn never_retries_auth_errors() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&auth_error(), 0));
        assert!(!policy.should_retry(&auth_error(), 1));
    }

    #[test]
    fn stops_at_max_attempts() {
        let policy = RetryPolicy::default();
        let err = network_error();
        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&err, 3));
        assert!(!policy.should_retry(&err, 4));
    }

    #[test]
    fn non_retryable_errors_stop_immediately() {
        let policy = RetryPolicy::default();
        let client_err = classify(&FailureInput::new("bad request", Some(400)));
        assert!(!policy.should_retry(&client_err, 0));
    }

    #[test]
    fn delay_stays_inside_jitter_envelope() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let expected = 1000f64 * 2f64.powi(attempt as i32);
            let delay = policy.delay_for(attempt).as_secs_f64() * 1000.0;
            assert!(delay >= expected, "attempt {attempt}: {delay} < {expected}");
            assert!(
                delay < expected * (1.0 + JITTER_FRACTION),
                "attempt {attempt}: {delay} too large"
            );
        }
    }

    #[test]
    fn delay_sequence_is_nondecreasing_up_to_cap() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..8 {
            let delay = policy.delay_for(attempt);
            // Doubling dominates the 10% jitter, so each step is at least as
            // long as the one before it until both hit the cap.
            assert!(delay >= previous, "attempt {attempt} regressed");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        assert_eq!(policy.delay_for(10), policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn combinator_reports_attempt_count() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = retry_with_backoff(policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Connect("connection refused".to_string())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match outcome {
            RetryOutcome::Exhausted { error, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.kind, ErrorKind::Network);
            }
            RetryOutcome::Success(_) => panic!("expected exhaustion"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn combinator_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let outcome = retry_with_backoff(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::Timeout)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_gate_stops_retrying() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = retry_with_backoff_while(
            policy,
            || false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::Timeout) }
            },
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_short_circuits_the_loop() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = retry_with_backoff(policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::SessionExpired) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match outcome {
            RetryOutcome::Exhausted { error, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(error.kind, ErrorKind::Auth);
            }
            RetryOutcome::Success(_) => panic!("expected exhaustion"),
        }
    }
}
