//! Guard configuration surface
//!
//! Everything here is a named, enumerated record resolved at startup -
//! never an ad hoc object constructed per request.

use serde::{Deserialize, Serialize};

/// Cents per client-facing credit (1 credit = $0.05).
///
/// Provider cost is tracked separately in real USD for reconciliation; this
/// rate only converts the configured currency budget into credit units.
pub const CENTS_PER_CREDIT: u64 = 5;

/// Convert a monthly budget in cents to the hard credit cap it implies.
pub fn budget_cents_to_credits(cents: u64) -> u64 {
    cents / CENTS_PER_CREDIT
}

/// Subscription plan for a tenant account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    /// Entry plan, $50/month metered budget
    Base,
    /// Growth plan, $200/month metered budget
    Pro,
    /// Top plan, $500/month metered budget
    Elite,
}

impl Plan {
    /// Monthly metered-operation budget in cents
    pub fn monthly_budget_cents(&self) -> u64 {
        match self {
            Self::Base => 5_000,
            Self::Pro => 20_000,
            Self::Elite => 50_000,
        }
    }

    /// Monthly budget converted to credits
    pub fn monthly_budget_credits(&self) -> u64 {
        budget_cents_to_credits(self.monthly_budget_cents())
    }
}

/// Costed features gated by the metering ledger.
///
/// The estimate is the advisory pre-check amount; the authoritative charge
/// is computed from measured usage at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Score an inbound lead
    LeadScoring,
    /// Score an open opportunity
    OpportunityScoring,
    /// Enrich a contact from external data
    ContactEnrichment,
    /// Draft an estimate document
    EstimateDraft,
    /// Optimize a service route
    RouteOptimizer,
    /// Draft a follow-up message
    FollowUpDraft,
    /// Triage an inbound message queue
    InboxAgent,
    /// Draft collections outreach
    CollectionsAgent,
    /// Outbound email delivery
    EmailSend,
    /// Outbound SMS delivery
    SmsSend,
    /// File ingestion and processing
    FileUpload,
    /// Generic external paid API call
    ExternalApi,
}

impl Feature {
    /// Advisory credit estimate for the pre-check
    pub fn estimated_credits(&self) -> u64 {
        match self {
            Self::LeadScoring | Self::OpportunityScoring => 10,
            Self::ContactEnrichment | Self::FollowUpDraft => 15,
            Self::EstimateDraft | Self::InboxAgent | Self::CollectionsAgent => 20,
            Self::RouteOptimizer => 25,
            Self::EmailSend => 1,
            Self::SmsSend => 2,
            Self::FileUpload => 5,
            Self::ExternalApi => 10,
        }
    }

    /// Stable feature name recorded on usage events
    pub fn name(&self) -> &'static str {
        match self {
            Self::LeadScoring => "lead_scoring",
            Self::OpportunityScoring => "opportunity_scoring",
            Self::ContactEnrichment => "contact_enrichment",
            Self::EstimateDraft => "estimate_draft",
            Self::RouteOptimizer => "route_optimizer",
            Self::FollowUpDraft => "follow_up_draft",
            Self::InboxAgent => "inbox_agent",
            Self::CollectionsAgent => "collections_agent",
            Self::EmailSend => "email_send",
            Self::SmsSend => "sms_send",
            Self::FileUpload => "file_upload",
            Self::ExternalApi => "external_api",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_plan_is_one_thousand_credits() {
        assert_eq!(Plan::Base.monthly_budget_credits(), 1_000);
    }

    #[test]
    fn budget_conversion_uses_fixed_rate() {
        assert_eq!(budget_cents_to_credits(5_000), 1_000);
        assert_eq!(budget_cents_to_credits(0), 0);
        assert_eq!(budget_cents_to_credits(4), 0);
    }

    #[test]
    fn feature_names_round_trip_serde() {
        let v = serde_json::to_value(Feature::LeadScoring).unwrap();
        assert_eq!(v, "lead_scoring");
        let f: Feature = serde_json::from_value(v).unwrap();
        assert_eq!(f, Feature::LeadScoring);
        assert_eq!(f.name(), "lead_scoring");
    }

    #[test]
    fn estimates_are_nonzero() {
        for f in [
            Feature::LeadScoring,
            Feature::RouteOptimizer,
            Feature::EmailSend,
            Feature::ExternalApi,
        ] {
            assert!(f.estimated_credits() > 0);
        }
    }
}
