//! Named rate-limit tiers

use serde::{Deserialize, Serialize};

/// Explicit rate-limit configuration record: `limit` requests per fixed
/// window of `window_ms` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Requests allowed per window
    pub limit: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

/// Named tiers, resolved at startup and assigned per route.
///
/// Routes pick a tier by name; tiers are never constructed dynamically
/// per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitTier {
    /// General API endpoints, 60 req/60s
    Default,
    /// Sensitive endpoints, 30 req/60s
    Strict,
    /// Read-heavy endpoints, 120 req/60s
    Relaxed,
    /// Expensive metered endpoints, 10 req/60s
    AiHeavy,
}

impl RateLimitTier {
    /// The tier's configuration record
    pub fn config(&self) -> TierConfig {
        match self {
            Self::Default => TierConfig { limit: 60, window_ms: 60_000 },
            Self::Strict => TierConfig { limit: 30, window_ms: 60_000 },
            Self::Relaxed => TierConfig { limit: 120, window_ms: 60_000 },
            Self::AiHeavy => TierConfig { limit: 10, window_ms: 60_000 },
        }
    }

    /// Tier name as emitted in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Strict => "STRICT",
            Self::Relaxed => "RELAXED",
            Self::AiHeavy => "AI_HEAVY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table() {
        assert_eq!(RateLimitTier::Default.config(), TierConfig { limit: 60, window_ms: 60_000 });
        assert_eq!(RateLimitTier::Strict.config().limit, 30);
        assert_eq!(RateLimitTier::Relaxed.config().limit, 120);
        assert_eq!(RateLimitTier::AiHeavy.config().limit, 10);
    }

    #[test]
    fn tier_serde_uses_screaming_names() {
        let v = serde_json::to_value(RateLimitTier::AiHeavy).unwrap();
        assert_eq!(v, "AI_HEAVY");
    }
}
