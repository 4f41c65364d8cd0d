//! Tollgate Metering Ledger
//!
//! Atomic credit-balance and monthly-budget enforcement for metered
//! operations. Two constraints hold after every commit, no matter how many
//! commits for the same tenant race:
//!
//! 1. `credit_balance >= 0` - the prepaid balance constraint
//! 2. `credits_used <= monthly_budget_credits` - the hard monthly cap
//!
//! `precheck` is advisory: a cheap early signal before performing the
//! expensive metered call. The authoritative decision happens at `commit`,
//! where the ledger store re-validates both constraints and applies the
//! writes as one conditional step. A failed condition aborts the whole
//! commit with no partial mutation.

#![warn(missing_docs)]

pub mod ledger;
pub mod metered;
pub mod rates;

pub use ledger::{DenialReason, MeasuredUsage, MeteringLedger, Precheck, Receipt, UsageAlerts, UsageSnapshot};
pub use metered::{metered, DegradeReason, Metered, MeterOptions, MeteredOutcome};
pub use rates::ModelRates;
