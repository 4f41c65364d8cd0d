//! The guard orchestrator: rate limit, idempotency, metering, in that order

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use toll_common::{Feature, GuardError, GuardResult, LimitSubject, TenantContext};
use toll_idempotency::{IdempotencyGuard, Precheck, StoreOutcome};
use toll_metering::{DenialReason, MeasuredUsage, MeteringLedger, ModelRates};
use toll_ratelimit::{RateLimitTier, RateLimiter};
use toll_store::{CounterStore, LedgerStore, RecordStore};

/// Per-route guard policy, declared at route registration
#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    /// Rate-limit tier applied to the route
    pub tier: RateLimitTier,
    /// Costed feature; `None` skips both metering steps
    pub feature: Option<Feature>,
}

impl RoutePolicy {
    /// Rate-limited route with no metering
    pub fn tiered(tier: RateLimitTier) -> Self {
        Self { tier, feature: None }
    }

    /// Rate-limited and metered route
    pub fn costed(tier: RateLimitTier, feature: Feature) -> Self {
        Self { tier, feature: Some(feature) }
    }
}

/// The guarded request, as the pipeline sees it
#[derive(Debug, Clone)]
pub struct GuardRequest {
    /// HTTP method
    pub method: String,
    /// Logical endpoint, part of the idempotency fingerprint
    pub endpoint: String,
    /// Request payload
    pub body: Value,
    /// Caller-supplied idempotency key, when present
    pub idempotency_key: Option<String>,
}

impl GuardRequest {
    /// A request with no idempotency key
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>, body: Value) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            body,
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// What the handler reports back to the pipeline.
///
/// `usage` is the measured token consumption of the metered call; `None`
/// means nothing billable ran and no commit happens. Handlers surface a
/// failed metered call as `GuardError::UpstreamMeteringFailure` instead.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// Response status
    pub status: u16,
    /// Response body
    pub body: Value,
    /// Measured usage of the metered call, when one ran
    pub usage: Option<MeasuredUsage>,
}

/// The pipeline's verdict: a response plus its guard metadata
#[derive(Debug, Clone)]
pub struct GuardResponse {
    /// Response status; denial statuses come from the violated guard
    pub status: u16,
    /// Response body; stored verbatim body on replay, error body on denial
    pub body: Value,
    /// Rate-limit metadata headers, present on allow and deny alike
    pub headers: Vec<(&'static str, String)>,
    /// Whether this response was served from an idempotency record
    pub replayed: bool,
    /// Credits debited by the metering commit, when one ran
    pub credits_charged: Option<u64>,
}

impl GuardResponse {
    fn denied(err: GuardError, headers: Vec<(&'static str, String)>) -> Self {
        Self {
            status: err.status(),
            body: serde_json::to_value(err.body()).unwrap_or_else(|_| Value::Null),
            headers,
            replayed: false,
            credits_charged: None,
        }
    }
}

/// Orchestrates the three guards around a handler in a fixed order.
///
/// All guards share one store so a single backend can serve counters,
/// idempotency records, and the ledger.
pub struct GuardPipeline<S> {
    limiter: RateLimiter<S>,
    idempotency: IdempotencyGuard<S>,
    ledger: MeteringLedger<S>,
}

impl<S> GuardPipeline<S>
where
    S: CounterStore + RecordStore + LedgerStore + 'static,
{
    /// Build a pipeline over a shared store with a rate card
    pub fn new(store: Arc<S>, rates: ModelRates) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone()),
            idempotency: IdempotencyGuard::new(store.clone()),
            ledger: MeteringLedger::new(store, rates),
        }
    }

    /// The pipeline's ledger, for account provisioning and usage views
    pub fn ledger(&self) -> &MeteringLedger<S> {
        &self.ledger
    }

    /// Run `handler` behind the guards.
    ///
    /// Returns `Ok` for every explicit guard verdict, denial or allow;
    /// `Err` only for internal failures, which callers map to a 5xx. A
    /// denial response carries the violated guard's status and error body.
    pub async fn execute<F, Fut>(
        &self,
        ctx: &TenantContext,
        policy: RoutePolicy,
        request: &GuardRequest,
        handler: F,
    ) -> GuardResult<GuardResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GuardResult<HandlerOutcome>>,
    {
        let subject = LimitSubject::Tenant(ctx.tenant_id);
        let decision = self
            .limiter
            .check_and_consume(&subject, Some(&ctx.request_path), policy.tier.config())
            .await?;
        let headers = decision.headers();
        if !decision.allowed {
            debug!(tenant_id = %ctx.tenant_id, path = %ctx.request_path, "request rate limited");
            let err = GuardError::RateLimitExceeded {
                retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            };
            return Ok(GuardResponse::denied(err, headers));
        }

        // Keyed dedup applies to unsafe methods only; a key on a safe
        // method is ignored, not an error.
        let key = if is_unsafe_method(&request.method) {
            request.idempotency_key.as_deref()
        } else {
            None
        };
        if let Some(key) = key {
            match self
                .idempotency
                .check(ctx.tenant_id, key, &request.method, &request.endpoint, &request.body)
                .await
            {
                Ok(Precheck::Miss) => {}
                Ok(Precheck::Replay(record)) => {
                    debug!(tenant_id = %ctx.tenant_id, key, "served idempotent replay");
                    return Ok(GuardResponse {
                        status: record.status,
                        body: record.body,
                        headers,
                        replayed: true,
                        credits_charged: None,
                    });
                }
                Err(err @ GuardError::IdempotencyConflict { .. })
                | Err(err @ GuardError::Validation(_)) => {
                    return Ok(GuardResponse::denied(err, headers));
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(feature) = policy.feature {
            let estimate = feature.estimated_credits();
            let pre = self.ledger.precheck(ctx.tenant_id, estimate).await?;
            if let Some(reason) = pre.reason {
                debug!(
                    tenant_id = %ctx.tenant_id,
                    feature = feature.name(),
                    estimate,
                    %reason,
                    "metering pre-check denied"
                );
                let err = match reason {
                    DenialReason::InsufficientCredits { balance } => {
                        GuardError::InsufficientCredit { required: estimate, balance }
                    }
                    DenialReason::BudgetReached { used, budget } => {
                        GuardError::BudgetExceeded { used, budget }
                    }
                };
                return Ok(GuardResponse::denied(err, headers));
            }
        }

        let outcome = handler().await?;

        let mut credits_charged = None;
        if let (Some(feature), Some(usage)) = (policy.feature, outcome.usage) {
            match self.commit_detached(ctx, feature, usage).await {
                Ok(credits) => credits_charged = Some(credits),
                Err(err @ GuardError::InsufficientCredit { .. })
                | Err(err @ GuardError::BudgetExceeded { .. }) => {
                    warn!(
                        tenant_id = %ctx.tenant_id,
                        feature = feature.name(),
                        error = %err,
                        "metering commit aborted after handler"
                    );
                    return Ok(GuardResponse::denied(err, headers));
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(key) = key {
            if outcome.status < 300 {
                match self
                    .idempotency
                    .store(
                        ctx.tenant_id,
                        key,
                        &request.method,
                        &request.endpoint,
                        &request.body,
                        outcome.status,
                        outcome.body.clone(),
                    )
                    .await
                {
                    Ok(StoreOutcome::Stored) => {}
                    Ok(StoreOutcome::Raced(winner)) => {
                        debug!(tenant_id = %ctx.tenant_id, key, "lost idempotency insert race");
                        return Ok(GuardResponse {
                            status: winner.status,
                            body: winner.body,
                            headers,
                            replayed: true,
                            credits_charged,
                        });
                    }
                    // the handler's work is done; a missed record only
                    // narrows dedup, it cannot be allowed to fail the request
                    Err(err) => {
                        warn!(tenant_id = %ctx.tenant_id, key, error = %err, "idempotency record store failed");
                    }
                }
            }
        }

        Ok(GuardResponse {
            status: outcome.status,
            body: outcome.body,
            headers,
            replayed: false,
            credits_charged,
        })
    }

    // The commit runs on a detached task: once the metered call has
    // returned usage, the charge lands even if the caller stops polling.
    async fn commit_detached(
        &self,
        ctx: &TenantContext,
        feature: Feature,
        usage: MeasuredUsage,
    ) -> GuardResult<u64> {
        let ledger = self.ledger.clone();
        let tenant_id = ctx.tenant_id;
        let principal_id = ctx.principal_id;
        let request_id = format!("req-{}", Uuid::new_v4());
        let task = tokio::spawn(async move {
            ledger
                .commit(tenant_id, Some(principal_id), feature, usage, &request_id)
                .await
        });
        match task.await {
            Ok(result) => result.map(|receipt| receipt.credits_charged),
            Err(join) => Err(GuardError::Internal(format!("metering commit task: {join}"))),
        }
    }
}

fn is_unsafe_method(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE"
    )
}
