//! Tollgate Idempotency Guard
//!
//! Fingerprinted request/response cache with conflict detection, scoped
//! per `(tenant, idempotency key)`. Only requests that carry an explicit
//! key on a side-effecting method pass through this guard; keyless
//! requests are not deduplicated.
//!
//! Decision table for a pre-check:
//!
//! | stored record | payload matches | outcome                         |
//! |---------------|-----------------|---------------------------------|
//! | no            | -               | miss, proceed to the handler    |
//! | yes           | yes             | replay stored status + body     |
//! | yes           | no              | conflict, handler not invoked   |
//!
//! Storage is a first-writer-wins conditional insert: when two requests
//! race on the same new key, exactly one insert wins and the loser is
//! handed the winner's record to apply the same decision table.

#![warn(missing_docs)]

pub mod fingerprint;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use toll_common::{GuardError, GuardResult, TenantId};
use toll_store::{IdempotencyRecord, InsertOutcome, RecordStore};

pub use fingerprint::{fingerprint, validate_key};

/// Pre-check outcome for a keyed request
#[derive(Debug, Clone)]
pub enum Precheck {
    /// No record for this scope; proceed to the handler
    Miss,
    /// Same key, same fingerprint: the stored response is returned
    /// verbatim and the handler is not invoked
    Replay(IdempotencyRecord),
}

/// Outcome of storing a response after the handler ran
#[derive(Debug, Clone)]
pub enum StoreOutcome {
    /// This request's response is now the stored record
    Stored,
    /// A concurrent request with a matching payload won the insert race;
    /// its record should be returned instead of this request's response
    Raced(IdempotencyRecord),
}

/// Idempotency guard over a first-writer-wins record store
pub struct IdempotencyGuard<S> {
    store: Arc<S>,
}

impl<S: RecordStore> IdempotencyGuard<S> {
    /// Create a guard over a record store
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Pre-check a keyed request against any stored record.
    ///
    /// A store failure aborts the pipeline: duplicate prevention takes
    /// priority over availability.
    pub async fn check(
        &self,
        tenant_id: TenantId,
        key: &str,
        method: &str,
        endpoint: &str,
        payload: &Value,
    ) -> GuardResult<Precheck> {
        validate_key(key)?;
        let fp = fingerprint(method, endpoint, payload);

        let stored = self
            .store
            .get(tenant_id, key)
            .await
            .map_err(|e| GuardError::Internal(format!("record store: {e}")))?;

        match stored {
            None => Ok(Precheck::Miss),
            Some(record) if record.fingerprint == fp && record.endpoint == endpoint => {
                debug!(%tenant_id, key, "idempotent replay");
                Ok(Precheck::Replay(record))
            }
            Some(record) => Err(GuardError::IdempotencyConflict {
                key: key.to_string(),
                previous_endpoint: record.endpoint,
                previous_timestamp: record.created_at,
            }),
        }
    }

    /// Store the handler's successful response for this scope.
    ///
    /// Only 2xx-equivalent outcomes should be stored; a failed attempt may
    /// legitimately be retried with the same key. Losing the insert race
    /// to a matching record yields [`StoreOutcome::Raced`]; losing to a
    /// conflicting record yields the conflict error.
    pub async fn store(
        &self,
        tenant_id: TenantId,
        key: &str,
        method: &str,
        endpoint: &str,
        payload: &Value,
        status: u16,
        body: Value,
    ) -> GuardResult<StoreOutcome> {
        let fp = fingerprint(method, endpoint, payload);
        let record = IdempotencyRecord {
            idempotency_key: key.to_string(),
            tenant_id,
            endpoint: endpoint.to_string(),
            fingerprint: fp.clone(),
            status,
            body,
            created_at: Utc::now(),
        };

        let outcome = self
            .store
            .insert_if_absent(record)
            .await
            .map_err(|e| GuardError::Internal(format!("record store: {e}")))?;

        match outcome {
            InsertOutcome::Inserted => Ok(StoreOutcome::Stored),
            InsertOutcome::Existing(winner) if winner.fingerprint == fp => {
                Ok(StoreOutcome::Raced(winner))
            }
            InsertOutcome::Existing(winner) => Err(GuardError::IdempotencyConflict {
                key: key.to_string(),
                previous_endpoint: winner.endpoint,
                previous_timestamp: winner.created_at,
            }),
        }
    }
}
