//! End-to-end pipeline behavior over the in-memory store

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use toll_common::{Feature, GuardResult, Plan, TenantContext};
use toll_guard::{GuardPipeline, GuardRequest, HandlerOutcome, RoutePolicy};
use toll_metering::{MeasuredUsage, ModelRates};
use toll_ratelimit::RateLimitTier;
use toll_store::{CreditAccount, LedgerStore, MemoryStore};

fn pipeline() -> (GuardPipeline<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (GuardPipeline::new(store.clone(), ModelRates::gpt_4o_mini()), store)
}

fn ctx_for(path: &str) -> TenantContext {
    TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), path)
}

async fn open_account(store: &MemoryStore, ctx: &TenantContext, balance: u64) {
    store
        .open_account(CreditAccount::on_plan(ctx.tenant_id, Plan::Base, balance))
        .await
        .unwrap();
}

fn ok_outcome(body: serde_json::Value) -> GuardResult<HandlerOutcome> {
    Ok(HandlerOutcome { status: 201, body, usage: None })
}

#[tokio::test]
async fn plain_route_passes_through_with_rate_headers() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/jobs");
    let request = GuardRequest::new("POST", "/api/jobs", json!({"title": "roof repair"}));

    let verdict = pipeline
        .execute(&ctx, RoutePolicy::tiered(RateLimitTier::Default), &request, || async {
            ok_outcome(json!({"id": 1}))
        })
        .await
        .unwrap();

    assert_eq!(verdict.status, 201);
    assert_eq!(verdict.body["id"], 1);
    assert!(!verdict.replayed);
    assert!(verdict.credits_charged.is_none());
    let names: Vec<_> = verdict.headers.iter().map(|(n, _)| *n).collect();
    assert!(names.contains(&"X-RateLimit-Limit"));
    assert!(names.contains(&"X-RateLimit-Remaining"));
    assert!(names.contains(&"X-RateLimit-Reset"));
}

#[tokio::test]
async fn eleventh_request_on_ai_heavy_tier_is_denied() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/ai/score");
    let request = GuardRequest::new("POST", "/api/ai/score", json!({}));
    let policy = RoutePolicy::tiered(RateLimitTier::AiHeavy);

    for i in 0..10 {
        let verdict = pipeline
            .execute(&ctx, policy, &request, || async { ok_outcome(json!({})) })
            .await
            .unwrap();
        assert_eq!(verdict.status, 201, "request {i} should be allowed");
    }

    let denied = pipeline
        .execute(&ctx, policy, &request, || async {
            panic!("handler must not run on a rate-limited request")
        })
        .await
        .unwrap();
    assert_eq!(denied.status, 429);
    assert_eq!(denied.body["error"], "TooManyRequests");
    let retry_after = denied
        .headers
        .iter()
        .find(|(n, _)| *n == "Retry-After")
        .map(|(_, v)| v.parse::<u64>().unwrap())
        .unwrap();
    assert!(retry_after > 0);
}

#[tokio::test]
async fn rate_windows_are_isolated_per_tenant() {
    let (pipeline, _store) = pipeline();
    let request = GuardRequest::new("POST", "/api/ai/score", json!({}));
    let policy = RoutePolicy::tiered(RateLimitTier::AiHeavy);

    let first = ctx_for("/api/ai/score");
    for _ in 0..10 {
        pipeline
            .execute(&first, policy, &request, || async { ok_outcome(json!({})) })
            .await
            .unwrap();
    }

    // a different tenant on the same route still has its full allowance
    let second = ctx_for("/api/ai/score");
    let verdict = pipeline
        .execute(&second, policy, &request, || async { ok_outcome(json!({})) })
        .await
        .unwrap();
    assert_eq!(verdict.status, 201);
}

#[tokio::test]
async fn keyed_replay_returns_the_stored_response_and_runs_the_handler_once() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/invoices");
    let request = GuardRequest::new("POST", "/api/invoices", json!({"amount": 120}))
        .with_idempotency_key("11111111-2222-4333-8444-555555555555");
    let policy = RoutePolicy::tiered(RateLimitTier::Default);
    let invocations = Arc::new(AtomicU32::new(0));

    let run = |n: Arc<AtomicU32>| async move {
        n.fetch_add(1, Ordering::SeqCst);
        ok_outcome(json!({"invoice": 42}))
    };

    let first = pipeline
        .execute(&ctx, policy, &request, || run(invocations.clone()))
        .await
        .unwrap();
    let second = pipeline
        .execute(&ctx, policy, &request, || run(invocations.clone()))
        .await
        .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(second.status, first.status);
    assert_eq!(second.body, first.body);
    assert!(second.replayed);
    assert!(!first.replayed);
}

#[tokio::test]
async fn keyed_payload_mismatch_conflicts_without_reinvoking_the_handler() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/invoices");
    let policy = RoutePolicy::tiered(RateLimitTier::Default);
    let key = "order-2026-08-29-0001";

    let original = GuardRequest::new("POST", "/api/invoices", json!({"amount": 120}))
        .with_idempotency_key(key);
    pipeline
        .execute(&ctx, policy, &original, || async { ok_outcome(json!({"invoice": 42})) })
        .await
        .unwrap();

    let altered = GuardRequest::new("POST", "/api/invoices", json!({"amount": 999}))
        .with_idempotency_key(key);
    let verdict = pipeline
        .execute(&ctx, policy, &altered, || async {
            panic!("handler must not run on a conflicting key")
        })
        .await
        .unwrap();

    assert_eq!(verdict.status, 409);
    assert_eq!(verdict.body["error"], "IdempotencyConflict");
    assert_eq!(verdict.body["details"]["idempotencyKey"], key);
}

#[tokio::test]
async fn malformed_idempotency_key_is_rejected_up_front() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/invoices");
    let request = GuardRequest::new("POST", "/api/invoices", json!({}))
        .with_idempotency_key("too short");

    let verdict = pipeline
        .execute(
            &ctx,
            RoutePolicy::tiered(RateLimitTier::Default),
            &request,
            || async { panic!("handler must not run with a malformed key") },
        )
        .await
        .unwrap();

    assert_eq!(verdict.status, 400);
    assert_eq!(verdict.body["error"], "ValidationError");
}

#[tokio::test]
async fn a_key_on_a_safe_method_is_ignored() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/invoices");
    let request = GuardRequest::new("GET", "/api/invoices", json!({}))
        .with_idempotency_key("11111111-2222-4333-8444-555555555555");
    let policy = RoutePolicy::tiered(RateLimitTier::Default);
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let n = invocations.clone();
        let verdict = pipeline
            .execute(&ctx, policy, &request, || async move {
                n.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerOutcome { status: 200, body: json!([]), usage: None })
            })
            .await
            .unwrap();
        assert!(!verdict.replayed);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn costed_route_charges_measured_usage() {
    let (pipeline, store) = pipeline();
    let ctx = ctx_for("/api/ai/score");
    open_account(&store, &ctx, 100).await;
    let request = GuardRequest::new("POST", "/api/ai/score", json!({"lead": 7}));
    let policy = RoutePolicy::costed(RateLimitTier::AiHeavy, Feature::LeadScoring);

    let verdict = pipeline
        .execute(&ctx, policy, &request, || async {
            Ok(HandlerOutcome {
                status: 200,
                body: json!({"score": 87}),
                // 2000 * 7.5/1000 + 1000 * 30/1000 = 45 credits
                usage: Some(MeasuredUsage { tokens_in: 2_000, tokens_out: 1_000 }),
            })
        })
        .await
        .unwrap();

    assert_eq!(verdict.status, 200);
    assert_eq!(verdict.credits_charged, Some(45));
    let account = store.account(ctx.tenant_id).await.unwrap().unwrap();
    assert_eq!(account.credit_balance, 55);
    let events = store.events(ctx.tenant_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].feature, Feature::LeadScoring);
}

#[tokio::test]
async fn costed_route_denies_before_the_handler_when_broke() {
    let (pipeline, store) = pipeline();
    let ctx = ctx_for("/api/ai/score");
    open_account(&store, &ctx, 3).await; // LeadScoring estimate is 10
    let request = GuardRequest::new("POST", "/api/ai/score", json!({}));

    let verdict = pipeline
        .execute(
            &ctx,
            RoutePolicy::costed(RateLimitTier::AiHeavy, Feature::LeadScoring),
            &request,
            || async { panic!("handler must not run without credit") },
        )
        .await
        .unwrap();

    assert_eq!(verdict.status, 402);
    assert_eq!(verdict.body["error"], "PaymentRequired");
    assert_eq!(verdict.body["details"]["balance"], 3);
    // the denial consumed no credit
    let account = store.account(ctx.tenant_id).await.unwrap().unwrap();
    assert_eq!(account.credit_balance, 3);
}

#[tokio::test]
async fn commit_abort_after_the_handler_is_a_payment_error() {
    let (pipeline, store) = pipeline();
    let ctx = ctx_for("/api/ai/estimate");
    // passes the 20-credit estimate pre-check, cannot cover 45 measured
    open_account(&store, &ctx, 25).await;
    let request = GuardRequest::new("POST", "/api/ai/estimate", json!({}));

    let verdict = pipeline
        .execute(
            &ctx,
            RoutePolicy::costed(RateLimitTier::AiHeavy, Feature::EstimateDraft),
            &request,
            || async {
                Ok(HandlerOutcome {
                    status: 200,
                    body: json!({"estimate": "..."}),
                    usage: Some(MeasuredUsage { tokens_in: 2_000, tokens_out: 1_000 }),
                })
            },
        )
        .await
        .unwrap();

    assert_eq!(verdict.status, 402);
    assert_eq!(verdict.body["error"], "PaymentRequired");
    // the aborted commit left the ledger untouched
    let account = store.account(ctx.tenant_id).await.unwrap().unwrap();
    assert_eq!(account.credit_balance, 25);
    assert!(store.events(ctx.tenant_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn costed_route_with_no_usage_charges_nothing() {
    let (pipeline, store) = pipeline();
    let ctx = ctx_for("/api/ai/score");
    open_account(&store, &ctx, 100).await;
    let request = GuardRequest::new("POST", "/api/ai/score", json!({}));

    let verdict = pipeline
        .execute(
            &ctx,
            RoutePolicy::costed(RateLimitTier::AiHeavy, Feature::LeadScoring),
            &request,
            || async {
                // served from cache, no metered call ran
                Ok(HandlerOutcome { status: 200, body: json!({"score": 87}), usage: None })
            },
        )
        .await
        .unwrap();

    assert_eq!(verdict.status, 200);
    assert!(verdict.credits_charged.is_none());
    let account = store.account(ctx.tenant_id).await.unwrap().unwrap();
    assert_eq!(account.credit_balance, 100);
}

#[tokio::test]
async fn handler_errors_propagate_without_storing_a_record() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/ai/score");
    let request = GuardRequest::new("POST", "/api/ai/score", json!({}))
        .with_idempotency_key("11111111-2222-4333-8444-555555555555");
    let policy = RoutePolicy::tiered(RateLimitTier::AiHeavy);

    let err = pipeline
        .execute(&ctx, policy, &request, || async {
            Err(toll_common::GuardError::UpstreamMeteringFailure("model timeout".into()))
        })
        .await
        .unwrap_err();
    assert_eq!(err.status(), 502);

    // the failed attempt stored nothing, so a retry reaches the handler
    let invocations = Arc::new(AtomicU32::new(0));
    let n = invocations.clone();
    let verdict = pipeline
        .execute(&ctx, policy, &request, || async move {
            n.fetch_add(1, Ordering::SeqCst);
            ok_outcome(json!({"score": 87}))
        })
        .await
        .unwrap();
    assert_eq!(verdict.status, 201);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_2xx_outcomes_are_not_recorded_for_replay() {
    let (pipeline, _store) = pipeline();
    let ctx = ctx_for("/api/invoices");
    let request = GuardRequest::new("POST", "/api/invoices", json!({}))
        .with_idempotency_key("11111111-2222-4333-8444-555555555555");
    let policy = RoutePolicy::tiered(RateLimitTier::Default);

    let first = pipeline
        .execute(&ctx, policy, &request, || async {
            Ok(HandlerOutcome { status: 422, body: json!({"error": "bad amount"}), usage: None })
        })
        .await
        .unwrap();
    assert_eq!(first.status, 422);

    // the failure was not memoized; the retry runs for real
    let second = pipeline
        .execute(&ctx, policy, &request, || async {
            Ok(HandlerOutcome { status: 201, body: json!({"invoice": 42}), usage: None })
        })
        .await
        .unwrap();
    assert_eq!(second.status, 201);
    assert!(!second.replayed);
}
