//! Credit ledger: advisory precheck and authoritative commit

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rates::ModelRates;
use toll_common::{budget_cents_to_credits, Feature, GuardError, GuardResult, Plan, TenantId};
use toll_store::{CommitOutcome, LedgerStore, StoreError, UsageEvent};

/// Token usage measured from the metered call's real response
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeasuredUsage {
    /// Input tokens consumed
    pub tokens_in: u64,
    /// Output tokens produced
    pub tokens_out: u64,
}

/// Why a precheck denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Prepaid balance below the estimate
    InsufficientCredits {
        /// Balance at check time
        balance: u64,
    },
    /// Monthly cap would be exceeded
    BudgetReached {
        /// Credits committed this month
        used: u64,
        /// Monthly budget in credits
        budget: u64,
    },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientCredits { .. } => {
                write!(f, "insufficient credits - top up or upgrade to continue")
            }
            Self::BudgetReached { .. } => write!(f, "monthly budget reached - resets next month"),
        }
    }
}

/// Advisory precheck result.
///
/// Non-binding: state may change between this check and the commit. The
/// commit re-validates everything.
#[derive(Debug, Clone, Copy)]
pub struct Precheck {
    /// Whether the estimate currently fits both constraints
    pub allowed: bool,
    /// Credits currently spendable (min of balance and budget headroom)
    pub remaining_credits: u64,
    /// Denial reason when not allowed
    pub reason: Option<DenialReason>,
}

/// Receipt for a committed metering transaction
#[derive(Debug, Clone, Copy)]
pub struct Receipt {
    /// Credits actually charged, from measured usage
    pub credits_charged: u64,
    /// Balance after the debit
    pub new_balance: u64,
}

/// Point-in-time usage view for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    /// Prepaid credits remaining
    pub credits_remaining: u64,
    /// Credits committed this month
    pub credits_used_month: u64,
    /// Monthly budget in credits
    pub monthly_budget_credits: u64,
    /// Whole-number percentage of the budget used, capped at 100
    pub percent_used: u8,
    /// Subscription plan
    pub plan: Plan,
    /// Month the snapshot covers
    pub month_key: String,
    /// Threshold alerts
    pub alerts: UsageAlerts,
}

/// Budget threshold alerts
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageAlerts {
    /// 75% of the monthly budget used
    pub warning: bool,
    /// 90% of the monthly budget used
    pub critical: bool,
    /// Budget fully used
    pub exhausted: bool,
}

/// The metering ledger.
///
/// Exclusively owns mutation of credit accounts, monthly summaries, and
/// usage events, through the ledger store's atomic commit.
pub struct MeteringLedger<S> {
    store: Arc<S>,
    rates: ModelRates,
}

impl<S> Clone for MeteringLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rates: self.rates.clone(),
        }
    }
}

/// Month key for an instant, `YYYY-MM`
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

impl<S: LedgerStore> MeteringLedger<S> {
    /// Create a ledger over a store with a rate card
    pub fn new(store: Arc<S>, rates: ModelRates) -> Self {
        Self { store, rates }
    }

    /// The active rate card
    pub fn rates(&self) -> &ModelRates {
        &self.rates
    }

    /// Advisory check that `estimated_credits` currently fits the balance
    /// and the month's remaining budget. Mutates nothing.
    pub async fn precheck(
        &self,
        tenant_id: TenantId,
        estimated_credits: u64,
    ) -> GuardResult<Precheck> {
        let account = self
            .store
            .account(tenant_id)
            .await
            .map_err(store_failure)?
            .ok_or_else(|| GuardError::Validation(format!("no credit account for tenant {tenant_id}")))?;

        if account.credit_balance < estimated_credits {
            return Ok(Precheck {
                allowed: false,
                remaining_credits: account.credit_balance,
                reason: Some(DenialReason::InsufficientCredits {
                    balance: account.credit_balance,
                }),
            });
        }

        let budget = budget_cents_to_credits(account.monthly_budget_cents);
        let used = self
            .store
            .month_summary(tenant_id, &month_key(Utc::now()))
            .await
            .map_err(store_failure)?
            .map(|s| s.credits_used)
            .unwrap_or(0);

        let headroom = budget.saturating_sub(used);
        if estimated_credits > headroom {
            return Ok(Precheck {
                allowed: false,
                remaining_credits: headroom,
                reason: Some(DenialReason::BudgetReached { used, budget }),
            });
        }

        Ok(Precheck {
            allowed: true,
            remaining_credits: account.credit_balance.min(headroom),
            reason: None,
        })
    }

    /// Authoritatively commit measured usage.
    ///
    /// Computes the charge from the rate card, then applies the balance
    /// debit, the capped monthly increment, and the usage-event append as
    /// one atomic store operation. Aborts with no partial mutation when a
    /// constraint fails; store unavailability aborts too - an uncommitted
    /// metered operation is never treated as free.
    pub async fn commit(
        &self,
        tenant_id: TenantId,
        principal_id: Option<Uuid>,
        feature: Feature,
        usage: MeasuredUsage,
        request_id: &str,
    ) -> GuardResult<Receipt> {
        let credits = self.rates.credits_for(usage.tokens_in, usage.tokens_out);
        let cost_usd = self.rates.cost_usd(usage.tokens_in, usage.tokens_out);

        let account = self
            .store
            .account(tenant_id)
            .await
            .map_err(store_failure)?
            .ok_or_else(|| GuardError::Validation(format!("no credit account for tenant {tenant_id}")))?;
        let budget = budget_cents_to_credits(account.monthly_budget_cents);

        let event = UsageEvent {
            tenant_id,
            principal_id,
            feature,
            model: self.rates.model.clone(),
            tokens_in: usage.tokens_in,
            tokens_out: usage.tokens_out,
            cost_usd,
            credits_used: credits,
            request_id: request_id.to_string(),
            created_at: Utc::now(),
        };

        let outcome = self
            .store
            .commit_usage(tenant_id, &month_key(Utc::now()), event, budget)
            .await
            .map_err(store_failure)?;

        match outcome {
            CommitOutcome::Committed { new_balance, credits_used_month } => {
                debug!(
                    %tenant_id,
                    feature = feature.name(),
                    credits,
                    new_balance,
                    credits_used_month,
                    request_id,
                    "metered usage committed"
                );
                Ok(Receipt { credits_charged: credits, new_balance })
            }
            CommitOutcome::InsufficientBalance { balance } => {
                warn!(%tenant_id, feature = feature.name(), credits, balance, "commit aborted: insufficient credits");
                Err(GuardError::InsufficientCredit { required: credits, balance })
            }
            CommitOutcome::BudgetExceeded { used, budget } => {
                warn!(%tenant_id, feature = feature.name(), credits, used, budget, "commit aborted: monthly budget");
                Err(GuardError::BudgetExceeded { used, budget })
            }
        }
    }

    /// Current balance, month usage, and threshold alerts for display
    pub async fn usage_snapshot(&self, tenant_id: TenantId) -> GuardResult<UsageSnapshot> {
        let account = self
            .store
            .account(tenant_id)
            .await
            .map_err(store_failure)?
            .ok_or_else(|| GuardError::Validation(format!("no credit account for tenant {tenant_id}")))?;

        let month_key = month_key(Utc::now());
        let used = self
            .store
            .month_summary(tenant_id, &month_key)
            .await
            .map_err(store_failure)?
            .map(|s| s.credits_used)
            .unwrap_or(0);
        let budget = budget_cents_to_credits(account.monthly_budget_cents);
        let percent_used = if budget == 0 {
            100
        } else {
            ((used.saturating_mul(100)) / budget).min(100) as u8
        };

        Ok(UsageSnapshot {
            credits_remaining: account.credit_balance,
            credits_used_month: used,
            monthly_budget_credits: budget,
            percent_used,
            plan: account.plan,
            month_key,
            alerts: UsageAlerts {
                warning: percent_used >= 75,
                critical: percent_used >= 90,
                exhausted: percent_used >= 100,
            },
        })
    }
}

fn store_failure(e: StoreError) -> GuardError {
    match e {
        StoreError::NotFound(what) => GuardError::Validation(what),
        other => GuardError::Internal(format!("ledger store: {other}")),
    }
}
