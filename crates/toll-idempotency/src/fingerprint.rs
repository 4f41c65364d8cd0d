//! Request fingerprinting and key validation

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use toll_common::{GuardError, GuardResult};

/// Hex length of a stored fingerprint
const FINGERPRINT_LEN: usize = 16;

/// Fingerprint a request as SHA-256 over its method, endpoint, and body.
///
/// serde_json maps serialize with sorted keys, so structurally equal
/// payloads always produce the same fingerprint.
pub fn fingerprint(method: &str, endpoint: &str, body: &Value) -> String {
    let canonical = json!({
        "method": method,
        "endpoint": endpoint,
        "body": body,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)[..FINGERPRINT_LEN].to_string()
}

/// Validate the caller-supplied key: a UUID, or 16-64 chars of
/// `[A-Za-z0-9_-]`.
pub fn validate_key(key: &str) -> GuardResult<()> {
    if Uuid::parse_str(key).is_ok() {
        return Ok(());
    }
    let well_formed = (16..=64).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(GuardError::Validation(format!(
            "idempotency key must be a UUID or 16-64 chars of [A-Za-z0-9_-], got {} chars",
            key.len()
        )))
    }
}
