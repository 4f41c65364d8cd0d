//! Credit and cost rate tables

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Per-model token rates.
///
/// Credits are the client-facing unit; USD tracks the provider's real
/// price in parallel for reconciliation and is independent of the credit
/// exchange rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRates {
    /// Upstream model identifier recorded on usage events
    pub model: String,
    /// Credits per 1k input tokens
    pub credits_in_per_1k: Decimal,
    /// Credits per 1k output tokens
    pub credits_out_per_1k: Decimal,
    /// Provider USD per 1k input tokens
    pub usd_in_per_1k: Decimal,
    /// Provider USD per 1k output tokens
    pub usd_out_per_1k: Decimal,
}

impl ModelRates {
    /// Default rate card for the platform's standard model
    pub fn gpt_4o_mini() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            credits_in_per_1k: dec!(7.5),
            credits_out_per_1k: dec!(30),
            usd_in_per_1k: dec!(0.00015),
            usd_out_per_1k: dec!(0.0006),
        }
    }

    /// Credits charged for measured usage.
    ///
    /// Rounded up, so the ledger never under-charges.
    pub fn credits_for(&self, tokens_in: u64, tokens_out: u64) -> u64 {
        let credits = Decimal::from(tokens_in) * self.credits_in_per_1k / dec!(1000)
            + Decimal::from(tokens_out) * self.credits_out_per_1k / dec!(1000);
        credits.ceil().to_u64().unwrap_or(u64::MAX)
    }

    /// Real provider cost for measured usage
    pub fn cost_usd(&self, tokens_in: u64, tokens_out: u64) -> Decimal {
        Decimal::from(tokens_in) * self.usd_in_per_1k / dec!(1000)
            + Decimal::from(tokens_out) * self.usd_out_per_1k / dec!(1000)
    }
}

impl Default for ModelRates {
    fn default() -> Self {
        Self::gpt_4o_mini()
    }
}
