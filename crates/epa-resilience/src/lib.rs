//! # epa-resilience — Upstream Call Resilience
//!
//! Circuit breaking, bounded retry, and deadline propagation for calls to
//! slow, unreliable upstreams. One [`UpstreamPolicy`] instance guards one
//! logical upstream key (e.g. `"insurance-eligibility"`, `"pharmacy"`);
//! the [`PolicyRegistry`] hands out shared instances so every caller of an
//! upstream observes the same breaker state.
//!
//! This crate knows nothing about prior-authorization semantics. Callers
//! classify their own errors via [`ClassifyFailure`]; the policy decides
//! whether to retry, when to fail fast, and what to feed the breaker's
//! rolling window.
//!
//! ## Crate Policy
//!
//! - Depends only on `epa`-external crates; usable by any gateway.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod breaker;
pub mod policy;
pub mod retry;

// Re-export primary types for ergonomic imports.
pub use breaker::{BreakerConfig, BreakerOpen, CircuitBreaker, CircuitState};
pub use policy::{CallError, ClassifyFailure, FailureClass, PolicyRegistry, UpstreamPolicy};
pub use retry::RetryConfig;
