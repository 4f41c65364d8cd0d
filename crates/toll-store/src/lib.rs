//! Tollgate Store - atomic conditional primitives behind the guards
//!
//! The three guards each make exactly one kind of round-trip to shared
//! state, and every one of those round-trips must be a single atomic step:
//!
//! - `CounterStore`: fixed-window increment-or-rotate for the rate limiter
//! - `RecordStore`: first-writer-wins conditional insert for idempotency
//! - `LedgerStore`: conditional debit + capped monthly increment + event
//!   append, applied together or not at all, for the metering ledger
//!
//! "Check then write" is never two calls here. An operation either reports
//! success or reports that its precondition was false; there is no window
//! in which a concurrent caller can slip between the check and the write.
//!
//! The bundled [`memory::MemoryStore`] implements all three interfaces for
//! a single process instance. A deployment with more than one instance
//! must back these interfaces with a store that supports atomic
//! conditional operations (a database transaction, CAS primitive, or
//! per-key actor); per-process maps would under- and over-count the
//! moment traffic is load-balanced.

#![warn(missing_docs)]

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use toll_common::{Feature, Plan, TenantId};

pub use memory::MemoryStore;

/// Store failure, distinct from a denied precondition.
///
/// Guards translate these to internal errors and fail closed; a store
/// failure is never an implicit allow.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Counter store (rate limiter)
// =============================================================================

/// Live fixed-window counter state after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Epoch millis at which the current window opened
    pub window_start_ms: u64,
}

/// Atomic keyed counters with fixed-window semantics
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key` within its fixed window.
    ///
    /// When no counter exists, or `now_ms - window_start >= window_ms`, the
    /// counter rotates to a fresh window with count 1 instead of being
    /// incremented. Expired windows are replaced lazily; nothing is
    /// explicitly deleted.
    async fn increment_window(
        &self,
        key: &str,
        window_ms: u64,
        now_ms: u64,
    ) -> StoreResult<WindowCount>;
}

// =============================================================================
// Record store (idempotency)
// =============================================================================

/// Stored request/response pair for one `(tenant, idempotency key)`.
///
/// Created once, immutable thereafter. Retention is an external policy;
/// the core never updates or deletes a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Caller-supplied key
    pub idempotency_key: String,
    /// Tenant scope; the same literal key never collides across tenants
    pub tenant_id: TenantId,
    /// Endpoint the key was first used on
    pub endpoint: String,
    /// Fingerprint of the original request payload
    pub fingerprint: String,
    /// Stored response status
    pub status: u16,
    /// Stored response body, replayed verbatim
    pub body: Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Outcome of a conditional insert
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// This caller won; the record is now stored
    Inserted,
    /// Another writer got there first; their record is returned untouched
    Existing(IdempotencyRecord),
}

/// First-writer-wins record storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert the record only if no record exists for its
    /// `(tenant_id, idempotency_key)` scope. Never overwrites.
    async fn insert_if_absent(&self, record: IdempotencyRecord) -> StoreResult<InsertOutcome>;

    /// Fetch the record for a scope, if any
    async fn get(&self, tenant_id: TenantId, key: &str) -> StoreResult<Option<IdempotencyRecord>>;
}

// =============================================================================
// Ledger store (metering)
// =============================================================================

/// Prepaid credit account for a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Prepaid balance in credits; never goes below zero
    pub credit_balance: u64,
    /// Configured monthly budget in cents
    pub monthly_budget_cents: u64,
    /// Subscription plan
    pub plan: Plan,
}

impl CreditAccount {
    /// Account on a plan with its default budget and an opening balance
    pub fn on_plan(tenant_id: TenantId, plan: Plan, credit_balance: u64) -> Self {
        Self {
            tenant_id,
            credit_balance,
            monthly_budget_cents: plan.monthly_budget_cents(),
            plan,
        }
    }
}

/// Per-month usage aggregate for a tenant.
///
/// `credits_used` never exceeds the monthly budget at the moment any
/// increment commits; the increment is conditional, not corrected after
/// the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyUsageSummary {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Month the aggregate covers, `YYYY-MM`
    pub month_key: String,
    /// Credits committed this month
    pub credits_used: u64,
    /// Input tokens consumed
    pub tokens_in: u64,
    /// Output tokens produced
    pub tokens_out: u64,
    /// Real provider cost, for reconciliation
    pub cost_usd: Decimal,
    /// Committed metered calls
    pub call_count: u64,
}

impl MonthlyUsageSummary {
    /// Zeroed aggregate, created lazily on first usage in a new month
    pub fn zeroed(tenant_id: TenantId, month_key: &str) -> Self {
        Self {
            tenant_id,
            month_key: month_key.to_string(),
            credits_used: 0,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: Decimal::ZERO,
            call_count: 0,
        }
    }
}

/// Append-only audit record of one committed metering transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Acting principal, when one was resolved
    pub principal_id: Option<Uuid>,
    /// Feature that consumed the resource
    pub feature: Feature,
    /// Upstream model/resource identifier
    pub model: String,
    /// Input tokens measured
    pub tokens_in: u64,
    /// Output tokens measured
    pub tokens_out: u64,
    /// Real provider cost
    pub cost_usd: Decimal,
    /// Credits charged
    pub credits_used: u64,
    /// Correlation id for the request
    pub request_id: String,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

/// Outcome of an atomic usage commit
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Both conditions held; balance, summary, and event were all applied
    Committed {
        /// Balance after the debit
        new_balance: u64,
        /// Monthly credits used after the increment
        credits_used_month: u64,
    },
    /// Balance precondition was false; nothing was mutated
    InsufficientBalance {
        /// Balance at the moment of the attempt
        balance: u64,
    },
    /// Budget precondition was false; nothing was mutated
    BudgetExceeded {
        /// Monthly credits already committed
        used: u64,
        /// The hard cap in credits
        budget: u64,
    },
}

/// Atomic credit/budget ledger.
///
/// The ledger exclusively owns mutation of accounts, monthly summaries,
/// and usage events. `commit_usage` is the only write path for usage;
/// it applies the balance debit, the capped monthly increment, and the
/// event append as one step or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch the credit account for a tenant
    async fn account(&self, tenant_id: TenantId) -> StoreResult<Option<CreditAccount>>;

    /// Provision an account. Replaces any existing account row.
    async fn open_account(&self, account: CreditAccount) -> StoreResult<()>;

    /// Add prepaid credits; returns the new balance
    async fn top_up(&self, tenant_id: TenantId, credits: u64) -> StoreResult<u64>;

    /// Fetch the monthly aggregate, if the month has any usage yet
    async fn month_summary(
        &self,
        tenant_id: TenantId,
        month_key: &str,
    ) -> StoreResult<Option<MonthlyUsageSummary>>;

    /// Atomically commit one usage event.
    ///
    /// Decrements the balance only if `balance >= event.credits_used`, and
    /// increments the monthly aggregate only if
    /// `credits_used + event.credits_used <= budget_credits`. A missing
    /// monthly aggregate is upserted zeroed before the conditional
    /// increment. If either condition is false the commit reports which
    /// one and mutates nothing.
    async fn commit_usage(
        &self,
        tenant_id: TenantId,
        month_key: &str,
        event: UsageEvent,
        budget_credits: u64,
    ) -> StoreResult<CommitOutcome>;

    /// Read the append-only usage-event trail for a tenant
    async fn events(&self, tenant_id: TenantId) -> StoreResult<Vec<UsageEvent>>;
}
