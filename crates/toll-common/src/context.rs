//! Tenant Context

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Tenant ID
pub type TenantId = Uuid;

/// Per-request tenant context, resolved once by the identity layer before
/// the guard pipeline runs. Immutable and never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    /// Tenant the request acts on behalf of
    pub tenant_id: TenantId,
    /// Authenticated principal within the tenant
    pub principal_id: Uuid,
    /// Request path, used for per-route counter discrimination
    pub request_path: String,
}

impl TenantContext {
    /// Create a resolved context
    pub fn new(tenant_id: TenantId, principal_id: Uuid, request_path: impl Into<String>) -> Self {
        Self {
            tenant_id,
            principal_id,
            request_path: request_path.into(),
        }
    }
}

/// Subject a rate-limit counter is scoped to.
///
/// Counters for one subject are never visible to another; the subject id is
/// a hard prefix of every counter key. Anonymous (public) endpoints fall
/// back to the caller network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitSubject {
    /// Resolved tenant
    Tenant(TenantId),
    /// No tenant resolved; keyed by caller address
    Anonymous(IpAddr),
}

impl LimitSubject {
    /// Key prefix enforcing subject isolation
    pub fn key_prefix(&self) -> String {
        match self {
            Self::Tenant(id) => format!("tenant:{id}"),
            Self::Anonymous(ip) => format!("ip:{ip}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_prefixes_never_collide() {
        let tenant = LimitSubject::Tenant(Uuid::new_v4());
        let ip = LimitSubject::Anonymous("10.0.0.1".parse().unwrap());
        assert!(tenant.key_prefix().starts_with("tenant:"));
        assert!(ip.key_prefix().starts_with("ip:"));
        assert_ne!(tenant.key_prefix(), ip.key_prefix());
    }

    #[test]
    fn distinct_tenants_have_distinct_prefixes() {
        let a = LimitSubject::Tenant(Uuid::new_v4());
        let b = LimitSubject::Tenant(Uuid::new_v4());
        assert_ne!(a.key_prefix(), b.key_prefix());
    }
}
