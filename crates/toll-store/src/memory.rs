//! In-memory store backend
//!
//! Correct for a single process instance only: the atomicity below comes
//! from per-entry locking inside the process. Multi-instance deployments
//! must implement the store traits over a shared backend instead.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::{
    CommitOutcome, CounterStore, CreditAccount, IdempotencyRecord, InsertOutcome, LedgerStore,
    MonthlyUsageSummary, RecordStore, StoreError, StoreResult, UsageEvent, WindowCount,
};
use toll_common::TenantId;

#[derive(Debug, Clone, Copy)]
struct Window {
    window_start_ms: u64,
    count: u64,
}

#[derive(Debug)]
struct TenantLedger {
    account: CreditAccount,
    months: HashMap<String, MonthlyUsageSummary>,
    events: Vec<UsageEvent>,
}

impl TenantLedger {
    fn new(account: CreditAccount) -> Self {
        Self {
            account,
            months: HashMap::new(),
            events: Vec::new(),
        }
    }
}

/// Single-instance implementation of all three store interfaces.
///
/// Counter, record, and ledger entries are held in sharded maps; every
/// conditional operation runs under that entry's exclusive lock, so there
/// is no lock shared across tenants.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Window>,
    records: DashMap<(TenantId, String), IdempotencyRecord>,
    ledgers: DashMap<TenantId, TenantLedger>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_window(
        &self,
        key: &str,
        window_ms: u64,
        now_ms: u64,
    ) -> StoreResult<WindowCount> {
        let mut slot = self.counters.entry(key.to_string()).or_insert(Window {
            window_start_ms: now_ms,
            count: 0,
        });

        if slot.count == 0 {
            // freshly created counter
            slot.count = 1;
            slot.window_start_ms = now_ms;
        } else if now_ms.saturating_sub(slot.window_start_ms) >= window_ms {
            // expired window rotates to count 1, it is not incremented
            slot.window_start_ms = now_ms;
            slot.count = 1;
        } else {
            slot.count += 1;
        }

        Ok(WindowCount {
            count: slot.count,
            window_start_ms: slot.window_start_ms,
        })
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_if_absent(&self, record: IdempotencyRecord) -> StoreResult<InsertOutcome> {
        match self
            .records
            .entry((record.tenant_id, record.idempotency_key.clone()))
        {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    key = %existing.get().idempotency_key,
                    "conditional insert lost to an existing record"
                );
                Ok(InsertOutcome::Existing(existing.get().clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(self
            .records
            .get(&(tenant_id, key.to_string()))
            .map(|r| r.clone()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn account(&self, tenant_id: TenantId) -> StoreResult<Option<CreditAccount>> {
        Ok(self.ledgers.get(&tenant_id).map(|l| l.account.clone()))
    }

    async fn open_account(&self, account: CreditAccount) -> StoreResult<()> {
        self.ledgers
            .insert(account.tenant_id, TenantLedger::new(account));
        Ok(())
    }

    async fn top_up(&self, tenant_id: TenantId, credits: u64) -> StoreResult<u64> {
        let mut ledger = self
            .ledgers
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("credit account for tenant {tenant_id}")))?;
        ledger.account.credit_balance += credits;
        Ok(ledger.account.credit_balance)
    }

    async fn month_summary(
        &self,
        tenant_id: TenantId,
        month_key: &str,
    ) -> StoreResult<Option<MonthlyUsageSummary>> {
        Ok(self
            .ledgers
            .get(&tenant_id)
            .and_then(|l| l.months.get(month_key).cloned()))
    }

    async fn commit_usage(
        &self,
        tenant_id: TenantId,
        month_key: &str,
        event: UsageEvent,
        budget_credits: u64,
    ) -> StoreResult<CommitOutcome> {
        // Exclusive entry lock: the checks and the writes below are one
        // atomic step with respect to any other commit for this tenant.
        let mut entry = self
            .ledgers
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("credit account for tenant {tenant_id}")))?;
        let ledger = entry.value_mut();
        let credits = event.credits_used;

        if ledger.account.credit_balance < credits {
            tracing::debug!(%tenant_id, credits, balance = ledger.account.credit_balance, "commit aborted: balance");
            return Ok(CommitOutcome::InsufficientBalance {
                balance: ledger.account.credit_balance,
            });
        }

        let summary = ledger
            .months
            .entry(month_key.to_string())
            .or_insert_with(|| MonthlyUsageSummary::zeroed(tenant_id, month_key));

        // saturating headroom comparison so a clamped oversized charge
        // aborts instead of overflowing the sum
        if credits > budget_credits.saturating_sub(summary.credits_used) {
            tracing::debug!(%tenant_id, credits, used = summary.credits_used, budget = budget_credits, "commit aborted: budget");
            return Ok(CommitOutcome::BudgetExceeded {
                used: summary.credits_used,
                budget: budget_credits,
            });
        }

        summary.credits_used += credits;
        summary.tokens_in += event.tokens_in;
        summary.tokens_out += event.tokens_out;
        summary.cost_usd += event.cost_usd;
        summary.call_count += 1;
        let credits_used_month = summary.credits_used;

        ledger.account.credit_balance -= credits;
        let new_balance = ledger.account.credit_balance;
        ledger.events.push(event);

        Ok(CommitOutcome::Committed {
            new_balance,
            credits_used_month,
        })
    }

    async fn events(&self, tenant_id: TenantId) -> StoreResult<Vec<UsageEvent>> {
        Ok(self
            .ledgers
            .get(&tenant_id)
            .map(|l| l.events.clone())
            .unwrap_or_default())
    }
}
