//! Tollgate Rate Limiter
//!
//! Per-tenant fixed-window throttling over an atomic [`CounterStore`].
//! The store rotates or increments a counter in one step, so the count per
//! window is exact even when many requests from the same tenant race. A
//! denied request still consumes its increment - the window never "leaks"
//! extra allowance to retries.
//!
//! Store failure fails closed: the limiter reports an internal error,
//! distinct from a rate-limit denial, and the pipeline aborts.

#![warn(missing_docs)]

pub mod limiter;
pub mod tier;

pub use limiter::{RateDecision, RateLimiter};
pub use tier::{RateLimitTier, TierConfig};
