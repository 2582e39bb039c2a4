//! # Rolling-Window Circuit Breaker
//!
//! One breaker guards one logical upstream key. State lives behind a single
//! `parking_lot::Mutex`, shared by every caller of that upstream, so the
//! rolling window and the open/half-open gate never lose updates under
//! concurrent probing.
//!
//! ## Lifecycle
//!
//! - **CLOSED**: calls pass. Each reported outcome lands in a rolling window
//!   of the last `window_size` calls; once at least `min_samples` outcomes
//!   are present and the failure rate reaches `failure_threshold`, the
//!   breaker opens.
//! - **OPEN**: calls fail immediately with [`BreakerOpen`] — no network I/O,
//!   no retry budget consumed — until `open_cooldown` elapses.
//! - **HALF_OPEN**: exactly one caller is admitted as the probe; everyone
//!   else fails fast as if still open. Probe success closes the breaker and
//!   resets the window; probe failure re-opens it with the cool-down
//!   doubled, up to `max_cooldown`, to avoid thrashing against a dependency
//!   that is still down.
//!
//! Business rejections (non-retryable errors) are excluded from the failure
//! window — they prove the remote answered — but they do resolve a pending
//! half-open probe as a success for availability purposes.
//!
//! ## Multi-Process Deployments
//!
//! Breaker state is process-local. When several worker processes share an
//! upstream, each trips independently and the fail-fast guarantee weakens to
//! per-process. Centralizing the window counters in a shared
//! atomic-increment store (keyed by upstream + window bucket, with the local
//! breaker demoted to a short-TTL cache) is the documented strategy if that
//! ever matters operationally; nothing in the call surface would change.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

/// Breaker position for one upstream key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs for one breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Rolling window length in calls.
    pub window_size: usize,
    /// Outcomes required before the breaker may trip.
    pub min_samples: usize,
    /// Failure rate (0.0..=1.0) at which the breaker opens.
    pub failure_threshold: f64,
    /// How long the breaker stays open before admitting a probe.
    pub open_cooldown: Duration,
    /// Ceiling for the cool-down as it doubles on repeated probe failures.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_samples: 5,
            failure_threshold: 0.5,
            open_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(240),
        }
    }
}

/// The breaker refused the call without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for {upstream} is open; retry after {retry_after:?}")]
pub struct BreakerOpen {
    pub upstream: String,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// `true` entries are failures.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    /// Current cool-down; doubles on probe failure, resets on close.
    cooldown: Duration,
    /// When the in-flight half-open probe was admitted, if any.
    probe_started: Option<Instant>,
}

/// Shared circuit breaker for one logical upstream key.
#[derive(Debug)]
pub struct CircuitBreaker {
    upstream: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(upstream: impl Into<String>, config: BreakerConfig) -> Self {
        let cooldown = config.open_cooldown;
        Self {
            upstream: upstream.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                cooldown,
                probe_started: None,
            }),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Current position, without evaluating cool-down expiry.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Outcomes currently in the rolling window.
    pub fn sample_count(&self) -> usize {
        self.inner.lock().window.len()
    }

    /// Failure rate over the current window, `None` when empty.
    pub fn failure_rate(&self) -> Option<f64> {
        let inner = self.inner.lock();
        if inner.window.is_empty() {
            return None;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        Some(failures as f64 / inner.window.len() as f64)
    }

    /// Remaining cool-down while open, `None` otherwise.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(inner.cooldown.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }

    /// Gate a call. `Ok(())` admits it; the caller must report the outcome
    /// with exactly one of [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure), or
    /// [`record_non_retryable`](Self::record_non_retryable).
    ///
    /// While open, expiry of the cool-down flips the breaker to half-open
    /// and admits the calling thread as the single probe.
    pub fn try_acquire(&self) -> Result<(), BreakerOpen> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or_default();
                if elapsed >= inner.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                    tracing::info!(upstream = %self.upstream, "circuit half-open, admitting probe");
                    self.count_transition("half_open");
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        upstream: self.upstream.clone(),
                        retry_after: inner.cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => match inner.probe_started {
                None => {
                    inner.probe_started = Some(Instant::now());
                    Ok(())
                }
                // A probe whose caller was cancelled mid-flight must not
                // wedge the gate; after one cool-down it may be taken over.
                Some(started) if started.elapsed() >= self.config.open_cooldown => {
                    inner.probe_started = Some(Instant::now());
                    Ok(())
                }
                Some(started) => Err(BreakerOpen {
                    upstream: self.upstream.clone(),
                    retry_after: self.config.open_cooldown.saturating_sub(started.elapsed()),
                }),
            },
        }
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                self.close(&mut inner);
                tracing::info!(upstream = %self.upstream, "circuit closed after successful probe");
            }
            CircuitState::Closed => self.push_outcome(&mut inner, false),
            // Stale result from a call admitted before the trip.
            CircuitState::Open => {}
        }
    }

    /// Report a transient failure (timeout, connection failure, remote 5xx).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.cooldown = inner.cooldown.saturating_mul(2).min(self.config.max_cooldown);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_started = None;
                tracing::warn!(
                    upstream = %self.upstream,
                    cooldown_ms = inner.cooldown.as_millis() as u64,
                    "probe failed, circuit re-opened"
                );
                self.count_transition("open");
            }
            CircuitState::Closed => {
                self.push_outcome(&mut inner, true);
                self.maybe_trip(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Report a non-retryable business rejection. Excluded from the failure
    /// window, but resolves a pending probe: the remote answered, so the
    /// dependency is up.
    pub fn record_non_retryable(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            self.close(&mut inner);
            tracing::info!(
                upstream = %self.upstream,
                "circuit closed after probe drew a business rejection"
            );
        }
    }

    fn push_outcome(&self, inner: &mut BreakerInner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.window_size {
            inner.window.pop_front();
        }
    }

    fn maybe_trip(&self, inner: &mut BreakerInner) {
        if inner.window.len() < self.config.min_samples {
            return;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        let rate = failures as f64 / inner.window.len() as f64;
        if rate >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.cooldown = self.config.open_cooldown;
            inner.probe_started = None;
            tracing::warn!(
                upstream = %self.upstream,
                failures,
                samples = inner.window.len(),
                cooldown_ms = inner.cooldown.as_millis() as u64,
                "failure rate tripped the circuit open"
            );
            self.count_transition("open");
        }
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.probe_started = None;
        inner.cooldown = self.config.open_cooldown;
        self.count_transition("closed");
    }

    fn count_transition(&self, to: &'static str) {
        metrics::counter!(
            "epa_breaker_transitions_total",
            "upstream" => self.upstream.clone(),
            "to" => to
        )
        .increment(1);
    }
}
