//! Fixed-window limiter

use std::sync::Arc;

use tracing::warn;

use crate::tier::TierConfig;
use toll_common::{epoch_ms, GuardError, GuardResult, LimitSubject};
use toll_store::CounterStore;

/// Outcome of one rate-limit check.
///
/// Emitted on both the allow and the deny path so the orchestrator can
/// attach limit metadata to every guarded response.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The window's request allowance
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch seconds at which the window resets
    pub reset_at_epoch_secs: u64,
    /// Seconds to wait before retrying; present only on deny
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    /// Response headers carrying the limit metadata
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_epoch_secs.to_string()),
        ];
        if let Some(retry) = self.retry_after_secs {
            headers.push(("Retry-After", retry.to_string()));
        }
        headers
    }
}

/// Per-tenant fixed-window rate limiter
pub struct RateLimiter<S> {
    store: Arc<S>,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a limiter over a counter store
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Count this request against the subject's window and decide.
    ///
    /// The counter key is hard-prefixed with the subject (tenant id or
    /// caller address), optionally discriminated by route, so one
    /// tenant's traffic can never consume another's allowance.
    pub async fn check_and_consume(
        &self,
        subject: &LimitSubject,
        route: Option<&str>,
        tier: TierConfig,
    ) -> GuardResult<RateDecision> {
        let key = match route {
            Some(route) => format!("rl:{}:{}", subject.key_prefix(), route),
            None => format!("rl:{}", subject.key_prefix()),
        };
        let now_ms = epoch_ms();

        let window = self
            .store
            .increment_window(&key, tier.window_ms, now_ms)
            .await
            .map_err(|e| {
                // fail closed: a store failure is never an allow
                warn!(key = %key, error = %e, "counter store failed, denying");
                GuardError::Internal(format!("counter store: {e}"))
            })?;

        let allowed = window.count <= tier.limit;
        let reset_ms = window.window_start_ms + tier.window_ms;
        let retry_after_secs = if allowed {
            None
        } else {
            // round up and never advertise a zero-second wait
            Some((reset_ms.saturating_sub(now_ms)).div_ceil(1_000).max(1))
        };

        Ok(RateDecision {
            allowed,
            limit: tier.limit,
            remaining: tier.limit.saturating_sub(window.count),
            reset_at_epoch_secs: reset_ms.div_ceil(1_000),
            retry_after_secs,
        })
    }
}
