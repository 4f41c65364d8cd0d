//! Guard error taxonomy and wire mapping

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Typed guard failure.
///
/// Every guard either explicitly allows, explicitly denies with one of
/// these variants, or surfaces `Internal` and aborts. Guards never swallow
/// a failure into an allow.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Per-tenant request rate exhausted for the current window
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the window resets
        retry_after_secs: u64,
    },

    /// Idempotency key reused with a different request
    #[error("idempotency key {key} was already used for a different request")]
    IdempotencyConflict {
        /// The reused key
        key: String,
        /// Endpoint of the stored record
        previous_endpoint: String,
        /// When the stored record was created
        previous_timestamp: DateTime<Utc>,
    },

    /// Prepaid credit balance cannot cover the operation
    #[error("insufficient credits: {required} required, {balance} available")]
    InsufficientCredit {
        /// Credits the operation needs
        required: u64,
        /// Current balance
        balance: u64,
    },

    /// Hard monthly credit cap would be exceeded
    #[error("monthly budget exceeded: {used} of {budget} credits used")]
    BudgetExceeded {
        /// Credits already committed this month
        used: u64,
        /// Monthly budget in credits
        budget: u64,
    },

    /// The metered call itself failed upstream
    #[error("metered call failed: {0}")]
    UpstreamMeteringFailure(String),

    /// Store unreachable or guard malfunction; the pipeline fails closed
    #[error("guard internal error: {0}")]
    Internal(String),

    /// Malformed guard input (missing tenant context, bad idempotency key, ...)
    #[error("invalid guard input: {0}")]
    Validation(String),
}

/// Result type for guard operations
pub type GuardResult<T> = Result<T, GuardError>;

impl GuardError {
    /// Stable machine-readable error kind for response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "TooManyRequests",
            Self::IdempotencyConflict { .. } => "IdempotencyConflict",
            Self::InsufficientCredit { .. } | Self::BudgetExceeded { .. } => "PaymentRequired",
            Self::UpstreamMeteringFailure(_) => "UpstreamMeteringFailure",
            Self::Internal(_) => "Internal",
            Self::Validation(_) => "ValidationError",
        }
    }

    /// HTTP status the error maps to
    pub fn status(&self) -> u16 {
        match self {
            Self::RateLimitExceeded { .. } => 429,
            Self::IdempotencyConflict { .. } => 409,
            Self::InsufficientCredit { .. } | Self::BudgetExceeded { .. } => 402,
            Self::UpstreamMeteringFailure(_) => 502,
            Self::Internal(_) => 500,
            Self::Validation(_) => 400,
        }
    }

    /// Machine-readable detail object, where the kind defines one
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(json!({
                "retryAfter": retry_after_secs,
            })),
            Self::IdempotencyConflict {
                key,
                previous_endpoint,
                previous_timestamp,
            } => Some(json!({
                "idempotencyKey": key,
                "previousEndpoint": previous_endpoint,
                "previousTimestamp": previous_timestamp,
            })),
            Self::InsufficientCredit { required, balance } => Some(json!({
                "credits": required,
                "balance": balance,
                "description": "insufficient credits - top up or upgrade to continue",
            })),
            Self::BudgetExceeded { used, budget } => Some(json!({
                "credits": used,
                "balance": budget.saturating_sub(*used),
                "description": "monthly budget reached - resets next month",
            })),
            _ => None,
        }
    }

    /// Structured response body for the error
    pub fn body(&self) -> ErrorBody {
        let message = match self {
            // never leak internals to callers
            Self::Internal(_) => "internal guard failure".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.kind().to_string(),
            message,
            details: self.details(),
        }
    }
}

/// Structured, machine-readable denial body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable error kind callers branch on
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Kind-specific details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            GuardError::RateLimitExceeded { retry_after_secs: 3 }.kind(),
            "TooManyRequests"
        );
        assert_eq!(
            GuardError::InsufficientCredit { required: 10, balance: 2 }.kind(),
            "PaymentRequired"
        );
        assert_eq!(
            GuardError::BudgetExceeded { used: 990, budget: 1000 }.kind(),
            "PaymentRequired"
        );
        assert_eq!(GuardError::Internal("db down".into()).kind(), "Internal");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(GuardError::RateLimitExceeded { retry_after_secs: 1 }.status(), 429);
        assert_eq!(
            GuardError::IdempotencyConflict {
                key: "k".into(),
                previous_endpoint: "/api/leads".into(),
                previous_timestamp: Utc::now(),
            }
            .status(),
            409
        );
        assert_eq!(GuardError::InsufficientCredit { required: 1, balance: 0 }.status(), 402);
        assert_eq!(GuardError::Validation("no tenant".into()).status(), 400);
        assert_eq!(GuardError::UpstreamMeteringFailure("timeout".into()).status(), 502);
    }

    #[test]
    fn internal_body_is_generic() {
        let body = GuardError::Internal("connection refused to 10.1.2.3:5432".into()).body();
        assert_eq!(body.error, "Internal");
        assert_eq!(body.message, "internal guard failure");
        assert!(body.details.is_none());
    }

    #[test]
    fn conflict_details_name_the_previous_request() {
        let err = GuardError::IdempotencyConflict {
            key: "abc-123".into(),
            previous_endpoint: "/api/invoices".into(),
            previous_timestamp: Utc::now(),
        };
        let details = err.details().unwrap();
        assert_eq!(details["idempotencyKey"], "abc-123");
        assert_eq!(details["previousEndpoint"], "/api/invoices");
    }
}
