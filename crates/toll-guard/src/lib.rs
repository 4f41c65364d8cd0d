//! Tollgate Guard Pipeline
//!
//! # Fixed-Order Orchestration
//!
//! Every guarded request runs the same gauntlet. Any denial
//! short-circuits everything after it; the handler only runs once all
//! guards allow.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        GuardPipeline                             │
//! │                                                                  │
//! │  ┌─────────────┐                                                 │
//! │  │   Request   │                                                 │
//! │  └──────┬──────┘                                                 │
//! │         ▼                                                        │
//! │  ┌─────────────┐  denied                                         │
//! │  │ Rate Limit  │─────────▶ 429 + Retry-After                     │
//! │  └──────┬──────┘                                                 │
//! │         ▼                                                        │
//! │  ┌─────────────┐  replay            conflict                     │
//! │  │ Idempotency │─────────▶ stored ──────────▶ 409                │
//! │  │  Pre-Check  │           response                              │
//! │  └──────┬──────┘           verbatim                              │
//! │         ▼                                                        │
//! │  ┌─────────────┐  denied                                         │
//! │  │  Metering   │─────────▶ 402                                   │
//! │  │  Pre-Check  │  (costed routes only)                           │
//! │  └──────┬──────┘                                                 │
//! │         ▼                                                        │
//! │  ┌─────────────┐                                                 │
//! │  │   Handler   │                                                 │
//! │  └──────┬──────┘                                                 │
//! │         ▼                                                        │
//! │  ┌─────────────┐  aborted                                        │
//! │  │  Metering   │─────────▶ 402                                   │
//! │  │   Commit    │  (measured usage only)                          │
//! │  └──────┬──────┘                                                 │
//! │         ▼                                                        │
//! │  ┌─────────────┐                                                 │
//! │  │ Idempotency │                                                 │
//! │  │    Store    │                                                 │
//! │  └──────┬──────┘                                                 │
//! │         ▼                                                        │
//! │      Response + X-RateLimit-* headers                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The handler is an explicit async closure returning [`HandlerOutcome`];
//! the pipeline never intercepts a transport layer. Rate-limit metadata
//! rides on every guarded response, allow or deny.

#![warn(missing_docs)]

pub mod http;
pub mod pipeline;

pub use pipeline::{GuardPipeline, GuardRequest, GuardResponse, HandlerOutcome, RoutePolicy};
