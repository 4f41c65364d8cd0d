//! Tollgate Common - shared types for the request safety & metering core
//!
//! Every mutating request in the platform passes through the guard pipeline
//! before business logic runs. This crate holds what all of the guards share:
//! the resolved tenant context, the typed guard error taxonomy with its
//! wire-level mapping, and the enumerated configuration surface (cost table,
//! plans, credit exchange rate).

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;

pub use config::*;
pub use context::*;
pub use error::*;

/// Milliseconds since the Unix epoch.
///
/// The fixed-window counters and reset headers are all epoch-based so that
/// the values survive a shared store and can be compared across instances.
#[inline]
pub fn epoch_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
