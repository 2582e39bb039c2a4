//! # Upstream Call Policy
//!
//! [`UpstreamPolicy`] wraps one logical upstream with the full call
//! discipline: breaker gate first (failing fast with zero network I/O while
//! open), then the attempt itself bounded by the caller's deadline, then
//! classification-driven retry with exponential backoff. Every attempt
//! outcome feeds the breaker's rolling window except non-retryable business
//! rejections, which prove the remote answered and are not availability
//! failures.
//!
//! Retries honor the caller's overall deadline: a backoff sleep that would
//! cross the deadline is not taken, and an attempt cut off mid-flight by the
//! deadline is abandoned rather than left running.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::retry::RetryConfig;

/// Whether a failed call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, connection failure, remote 5xx-equivalent. Retryable and
    /// counted against the breaker.
    Transient,
    /// Validation failure or explicit business rejection. Propagates
    /// immediately, consumes no retry budget, excluded from the breaker's
    /// failure accounting.
    Permanent,
}

/// Implemented by gateway error types so the policy can classify failures
/// without knowing their domain.
pub trait ClassifyFailure {
    fn failure_class(&self) -> FailureClass;
}

/// Why a policy-guarded call did not produce a value.
#[derive(Debug, Error)]
pub enum CallError<E>
where
    E: std::error::Error + 'static,
{
    /// The breaker refused the call; nothing touched the network.
    #[error("{upstream} circuit is open; retry after {retry_after_ms}ms")]
    BreakerOpen { upstream: String, retry_after_ms: u64 },
    /// Every attempt in the budget failed with a transient error.
    #[error("{upstream} still failing after {attempts} attempts")]
    RetriesExhausted {
        upstream: String,
        attempts: u32,
        #[source]
        last: E,
    },
    /// The caller's deadline expired before an attempt could succeed.
    /// `attempts` counts attempts started before the cutoff, so callers can
    /// tell "nothing was ever sent" from "an attempt may still be in
    /// flight"; `last` carries the most recent attempt error when one
    /// completed before the cutoff.
    #[error("{upstream} call abandoned at its deadline after {elapsed_ms}ms")]
    DeadlineExceeded {
        upstream: String,
        elapsed_ms: u64,
        attempts: u32,
        last: Option<E>,
    },
    /// Non-retryable failure, propagated as-is.
    #[error(transparent)]
    Fatal(E),
}

/// Breaker + retry discipline for one logical upstream key.
#[derive(Debug)]
pub struct UpstreamPolicy {
    upstream: String,
    breaker: CircuitBreaker,
    retry: RetryConfig,
}

impl UpstreamPolicy {
    pub fn new(upstream: impl Into<String>, breaker: BreakerConfig, retry: RetryConfig) -> Self {
        let upstream = upstream.into();
        Self {
            breaker: CircuitBreaker::new(upstream.clone(), breaker),
            upstream,
            retry,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The shared breaker guarding this upstream.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `operation` under the full call discipline. The closure is
    /// invoked once per attempt; `deadline` bounds the whole call including
    /// backoff sleeps.
    pub async fn call<T, E, F, Fut>(
        &self,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<T, CallError<E>>
    where
        E: std::error::Error + ClassifyFailure + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            if let Some(cutoff) = deadline {
                if Instant::now() >= cutoff {
                    self.count_outcome("deadline");
                    return Err(CallError::DeadlineExceeded {
                        upstream: self.upstream.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        attempts,
                        last: None,
                    });
                }
            }

            if let Err(open) = self.breaker.try_acquire() {
                self.count_outcome("breaker_open");
                return Err(CallError::BreakerOpen {
                    upstream: open.upstream,
                    retry_after_ms: open.retry_after.as_millis() as u64,
                });
            }

            attempts += 1;
            let outcome = match deadline {
                Some(cutoff) => {
                    let cutoff = tokio::time::Instant::from_std(cutoff);
                    match tokio::time::timeout_at(cutoff, operation()).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            // Cut off mid-flight: a failed attempt as far as
                            // the breaker is concerned.
                            self.breaker.record_failure();
                            self.count_outcome("deadline");
                            return Err(CallError::DeadlineExceeded {
                                upstream: self.upstream.clone(),
                                elapsed_ms: started.elapsed().as_millis() as u64,
                                attempts,
                                last: None,
                            });
                        }
                    }
                }
                None => operation().await,
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    self.count_outcome("success");
                    metrics::histogram!(
                        "epa_upstream_call_seconds",
                        "upstream" => self.upstream.clone()
                    )
                    .record(started.elapsed().as_secs_f64());
                    return Ok(value);
                }
                Err(error) => match error.failure_class() {
                    FailureClass::Permanent => {
                        self.breaker.record_non_retryable();
                        self.count_outcome("rejected");
                        return Err(CallError::Fatal(error));
                    }
                    FailureClass::Transient => {
                        self.breaker.record_failure();
                        self.count_outcome("transient_failure");
                        if attempts >= self.retry.max_attempts {
                            tracing::warn!(
                                upstream = %self.upstream,
                                attempts,
                                error = %error,
                                "retry budget exhausted"
                            );
                            return Err(CallError::RetriesExhausted {
                                upstream: self.upstream.clone(),
                                attempts,
                                last: error,
                            });
                        }
                        let delay = self.retry.delay_for(attempts - 1);
                        if let Some(cutoff) = deadline {
                            let remaining = cutoff.saturating_duration_since(Instant::now());
                            if delay >= remaining {
                                self.count_outcome("deadline");
                                return Err(CallError::DeadlineExceeded {
                                    upstream: self.upstream.clone(),
                                    elapsed_ms: started.elapsed().as_millis() as u64,
                                    attempts,
                                    last: Some(error),
                                });
                            }
                        }
                        tracing::warn!(
                            upstream = %self.upstream,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "transient upstream failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }

    fn count_outcome(&self, outcome: &'static str) {
        metrics::counter!(
            "epa_upstream_calls_total",
            "upstream" => self.upstream.clone(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

/// Process-wide map of upstream key to its shared policy, so every gateway
/// instance talking to the same upstream shares one breaker.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: DashMap<String, Arc<UpstreamPolicy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a policy with explicit tuning, replacing any existing one.
    pub fn configure(
        &self,
        upstream: impl Into<String>,
        breaker: BreakerConfig,
        retry: RetryConfig,
    ) -> Arc<UpstreamPolicy> {
        let upstream = upstream.into();
        let policy = Arc::new(UpstreamPolicy::new(upstream.clone(), breaker, retry));
        self.policies.insert(upstream, policy.clone());
        policy
    }

    pub fn get(&self, upstream: &str) -> Option<Arc<UpstreamPolicy>> {
        self.policies.get(upstream).map(|entry| entry.clone())
    }

    /// Fetch the policy for `upstream`, creating one with the supplied
    /// tuning on first use. Later callers share the first instance, so every
    /// gateway talking to an upstream sees the same breaker.
    pub fn get_or_configure(
        &self,
        upstream: &str,
        breaker: BreakerConfig,
        retry: RetryConfig,
    ) -> Arc<UpstreamPolicy> {
        self.policies
            .entry(upstream.to_string())
            .or_insert_with(|| Arc::new(UpstreamPolicy::new(upstream, breaker, retry)))
            .clone()
    }

    /// Fetch the policy for `upstream`, creating one with default tuning on
    /// first use.
    pub fn get_or_default(&self, upstream: &str) -> Arc<UpstreamPolicy> {
        self.get_or_configure(upstream, BreakerConfig::default(), RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Error)]
    enum FlakyError {
        #[error("connection reset")]
        Network,
        #[error("member not eligible")]
        Rejected,
    }

    impl ClassifyFailure for FlakyError {
        fn failure_class(&self) -> FailureClass {
            match self {
                FlakyError::Network => FailureClass::Transient,
                FlakyError::Rejected => FailureClass::Permanent,
            }
        }
    }

    fn quick_policy(max_attempts: u32) -> UpstreamPolicy {
        UpstreamPolicy::new(
            "test-upstream",
            BreakerConfig {
                window_size: 10,
                min_samples: 5,
                failure_threshold: 0.5,
                open_cooldown: Duration::from_millis(40),
                max_cooldown: Duration::from_millis(160),
            },
            RetryConfig {
                max_attempts,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
                jitter: 0.0,
            },
        )
    }

    // ---- retry discipline ----

    #[tokio::test]
    async fn transient_failure_then_success_stays_within_budget() {
        let policy = quick_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, CallError<FlakyError>> = policy
            .call(None, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(FlakyError::Network)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "one retry, then success");
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_the_last_error() {
        let policy = quick_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), CallError<FlakyError>> = policy
            .call(None, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FlakyError::Network)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3, "exactly the budget");
        match result.unwrap_err() {
            CallError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, FlakyError::Network));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn business_rejection_propagates_without_retry() {
        let policy = quick_policy(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), CallError<FlakyError>> = policy
            .call(None, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FlakyError::Rejected)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry for rejections");
        assert!(matches!(result.unwrap_err(), CallError::Fatal(FlakyError::Rejected)));
        // Rejections are not availability failures.
        assert_eq!(policy.breaker().sample_count(), 0);
    }

    // ---- breaker integration ----

    #[tokio::test]
    async fn open_breaker_short_circuits_with_zero_attempts() {
        let policy = quick_policy(3);
        for _ in 0..5 {
            policy.breaker().record_failure();
        }
        assert_eq!(policy.breaker().state(), CircuitState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), CallError<FlakyError>> = policy
            .call(None, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), CallError::BreakerOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no network attempt while open");
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_concurrent_probe() {
        let policy = Arc::new(quick_policy(1));
        for _ in 0..5 {
            policy.breaker().record_failure();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let probe_like = |policy: Arc<UpstreamPolicy>| async move {
            policy
                .call::<_, FlakyError, _, _>(None, || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok("probed")
                })
                .await
        };

        let (first, second) = tokio::join!(probe_like(policy.clone()), probe_like(policy.clone()));
        let outcomes = [first, second];
        let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let fast_failures = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(CallError::BreakerOpen { .. })))
            .count();
        assert_eq!(successes, 1, "exactly one caller runs the probe");
        assert_eq!(fast_failures, 1, "the other fails fast");
        assert_eq!(policy.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn full_recovery_cycle_closes_the_breaker() {
        let policy = quick_policy(1);

        // Five transient failures trip it.
        for _ in 0..5 {
            let _: Result<(), CallError<FlakyError>> =
                policy.call(None, || async { Err(FlakyError::Network) }).await;
        }
        assert_eq!(policy.breaker().state(), CircuitState::Open);

        // Still open: fail fast.
        let blocked: Result<(), CallError<FlakyError>> =
            policy.call(None, || async { Ok(()) }).await;
        assert!(matches!(blocked.unwrap_err(), CallError::BreakerOpen { .. }));

        // After the cool-down the probe runs and closes it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let probed: Result<(), CallError<FlakyError>> =
            policy.call(None, || async { Ok(()) }).await;
        assert!(probed.is_ok());
        assert_eq!(policy.breaker().state(), CircuitState::Closed);
    }

    // ---- deadlines ----

    #[tokio::test]
    async fn deadline_cuts_a_hung_attempt() {
        let policy = quick_policy(3);
        let started = Instant::now();
        let deadline = Some(started + Duration::from_millis(30));

        let result: Result<(), CallError<FlakyError>> = policy
            .call(deadline, || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result.unwrap_err(), CallError::DeadlineExceeded { .. }));
        assert!(
            started.elapsed() < Duration::from_millis(200),
            "the hung attempt must be abandoned, not awaited"
        );
    }

    #[tokio::test]
    async fn retries_share_the_deadline_instead_of_getting_fresh_budgets() {
        let policy = UpstreamPolicy::new(
            "test-upstream",
            BreakerConfig::default(),
            RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(400),
                jitter: 0.0,
            },
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let deadline = Some(Instant::now() + Duration::from_millis(60));

        let result: Result<(), CallError<FlakyError>> = policy
            .call(deadline, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FlakyError::Network)
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), CallError::DeadlineExceeded { .. }));
        assert!(
            calls.load(Ordering::SeqCst) <= 2,
            "a 60ms deadline cannot fund five 50ms backoffs"
        );
    }

    // ---- registry ----

    #[tokio::test]
    async fn registry_hands_out_shared_instances() {
        let registry = PolicyRegistry::new();
        let first = registry.get_or_default("insurance");
        let second = registry.get_or_default("insurance");
        assert!(Arc::ptr_eq(&first, &second));

        let configured = registry.configure(
            "pharmacy",
            BreakerConfig::default(),
            RetryConfig::default(),
        );
        let fetched = registry.get("pharmacy").unwrap();
        assert!(Arc::ptr_eq(&configured, &fetched));
        assert!(registry.get("unknown").is_none());
    }
}
