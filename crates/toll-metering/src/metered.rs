//! Fallback-on-denial wrapper around metered operations

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::ledger::{DenialReason, MeasuredUsage, MeteringLedger};
use toll_common::{Feature, TenantContext};
use toll_store::LedgerStore;

/// Options for one metered call
#[derive(Debug, Clone)]
pub struct MeterOptions {
    /// Feature being charged
    pub feature: Feature,
    /// Advisory pre-check amount in credits
    pub estimated_credits: u64,
    /// Acting principal, when known
    pub principal_id: Option<Uuid>,
}

impl MeterOptions {
    /// Options with the feature's standard estimate
    pub fn for_feature(feature: Feature) -> Self {
        Self {
            feature,
            estimated_credits: feature.estimated_credits(),
            principal_id: None,
        }
    }
}

/// A metered operation's value plus its measured token usage
#[derive(Debug, Clone)]
pub struct Metered<T> {
    /// The operation's result
    pub value: T,
    /// Input tokens consumed
    pub tokens_in: u64,
    /// Output tokens produced
    pub tokens_out: u64,
}

/// Why a metered call degraded to its fallback
#[derive(Debug, Clone)]
pub enum DegradeReason {
    /// Precheck denied the estimate
    PrecheckDenied(DenialReason),
    /// Operation ran but the commit constraint check failed
    CommitAborted(String),
    /// The wrapped operation itself failed
    UpstreamFailed(String),
    /// Ledger or store failure
    GuardFailure(String),
}

/// Outcome of a metered call: the real value with its charge, or the
/// caller-supplied fallback
#[derive(Debug)]
pub enum MeteredOutcome<T> {
    /// Operation ran and usage was committed
    Charged {
        /// The operation's value
        value: T,
        /// Credits debited for measured usage
        credits_charged: u64,
    },
    /// Operation skipped or its charge could not be committed
    Degraded {
        /// The caller-supplied fallback value
        fallback: T,
        /// Why the call degraded
        reason: DegradeReason,
    },
}

impl<T> MeteredOutcome<T> {
    /// The value either way
    pub fn into_value(self) -> T {
        match self {
            Self::Charged { value, .. } => value,
            Self::Degraded { fallback, .. } => fallback,
        }
    }

    /// Whether the real operation ran and was charged
    pub fn is_charged(&self) -> bool {
        matches!(self, Self::Charged { .. })
    }
}

/// Run `op` under the metering ledger, degrading to `fallback` instead of
/// failing.
///
/// Prechecks the estimate, runs the operation, then commits the charge
/// computed from its measured usage. Denials and failures at any stage
/// return the fallback with a reason; this function never errors. The
/// commit runs on a detached task so a caller that stops polling after the
/// upstream call still pays for the usage it consumed.
pub async fn metered<S, T, F, Fut, E>(
    ledger: &MeteringLedger<S>,
    ctx: &TenantContext,
    opts: MeterOptions,
    fallback: T,
    op: F,
) -> MeteredOutcome<T>
where
    S: LedgerStore + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Metered<T>, E>>,
    E: Display,
{
    let tenant_id = ctx.tenant_id;
    let feature = opts.feature;

    let precheck = match ledger.precheck(tenant_id, opts.estimated_credits).await {
        Ok(p) => p,
        Err(e) => {
            warn!(%tenant_id, feature = feature.name(), error = %e, "metered precheck failed");
            return MeteredOutcome::Degraded {
                fallback,
                reason: DegradeReason::GuardFailure(e.to_string()),
            };
        }
    };
    if let Some(reason) = precheck.reason {
        debug!(%tenant_id, feature = feature.name(), %reason, "metered call degraded at precheck");
        return MeteredOutcome::Degraded {
            fallback,
            reason: DegradeReason::PrecheckDenied(reason),
        };
    }

    let measured = match op().await {
        Ok(m) => m,
        Err(e) => {
            warn!(%tenant_id, feature = feature.name(), error = %e, "metered operation failed upstream");
            return MeteredOutcome::Degraded {
                fallback,
                reason: DegradeReason::UpstreamFailed(e.to_string()),
            };
        }
    };

    let usage = MeasuredUsage {
        tokens_in: measured.tokens_in,
        tokens_out: measured.tokens_out,
    };
    let request_id = format!("req-{}", Uuid::new_v4());
    let commit = {
        let ledger = ledger.clone();
        let principal_id = opts.principal_id;
        tokio::spawn(async move {
            ledger
                .commit(tenant_id, principal_id, feature, usage, &request_id)
                .await
        })
    };

    match commit.await {
        Ok(Ok(receipt)) => MeteredOutcome::Charged {
            value: measured.value,
            credits_charged: receipt.credits_charged,
        },
        Ok(Err(e)) => {
            warn!(%tenant_id, feature = feature.name(), error = %e, "metered commit aborted");
            MeteredOutcome::Degraded {
                fallback,
                reason: DegradeReason::CommitAborted(e.to_string()),
            }
        }
        Err(join) => {
            warn!(%tenant_id, feature = feature.name(), error = %join, "metered commit task failed");
            MeteredOutcome::Degraded {
                fallback,
                reason: DegradeReason::GuardFailure(join.to_string()),
            }
        }
    }
}
