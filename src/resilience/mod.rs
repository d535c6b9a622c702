//! Resilience primitives used by the polling loop.
//!
//! ```text
//! each cycle:
//!     → circuit_breaker.rs (skip the network entirely while open)
//!     → rate_limiter.rs (wait for request budget)
//!     → fetch
//!     → on failure: backoff.rs (next interval), circuit_breaker.rs (maybe open)
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use backoff::{BackoffCalculator, BackoffConfig, BackoffStrategy};
pub use circuit_breaker::CircuitBreaker;
pub use rate_limiter::RateLimiter;
