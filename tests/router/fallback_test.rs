//! Tests for the provider fallback chain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use openclaw::errors::{CoreError, CoreResult};
use openclaw::router::providers::{
    ChatProvider, CompletionRequest, CompletionResponse, ProviderCost,
};
use openclaw::router::{ModelRouter, RouteRequest};
use openclaw::store::Storage;

struct MockProvider {
    name: String,
    fail_status: Option<u16>,
    fail_body: String,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    fn ok(name: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        Self::build(name, None, "")
    }

    fn failing(name: &str, status: u16, body: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        Self::build(name, Some(status), body)
    }

    fn build(name: &str, fail_status: Option<u16>, body: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                name: name.to_owned(),
                fail_status,
                fail_body: body.to_owned(),
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn cost(&self) -> ProviderCost {
        ProviderCost {
            input: 0.10,
            output: 0.40,
        }
    }

    async fn complete(&self, _request: &CompletionRequest) -> CoreResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_status {
            return Err(CoreError::ProviderHttp {
                status,
                body: self.fail_body.clone(),
            });
        }
        Ok(CompletionResponse {
            text: format!("{} response", self.name),
            tokens_in: 10,
            tokens_out: 5,
        })
    }
}

async fn fresh() -> Storage {
    Storage::open_in_memory()
        .await
        .expect("in-memory storage should open")
}

#[tokio::test]
async fn rate_limited_primary_falls_through() {
    let storage = fresh().await;
    let mut router = ModelRouter::new(storage.pool().clone(), "primary");
    let (primary, primary_calls) = MockProvider::failing("primary", 429, "slow down");
    let (backup, backup_calls) = MockProvider::ok("backup");
    router.register(primary);
    router.register(backup);
    router.set_fallbacks("primary", &["backup"]);

    let outcome = router
        .route(&RouteRequest {
            prompt: "hello".to_owned(),
            ..RouteRequest::default()
        })
        .await
        .expect("fallback should succeed");

    assert_eq!(outcome.provider, "backup");
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backup_calls.load(Ordering::SeqCst), 1);

    let (provider,): (String,) =
        sqlx::query_as("SELECT provider FROM token_usage ORDER BY id DESC LIMIT 1")
            .fetch_one(storage.pool())
            .await
            .expect("usage row");
    assert_eq!(provider, "backup", "usage logged under the fallback");
}

#[tokio::test]
async fn quota_body_counts_as_retryable() {
    let storage = fresh().await;
    let mut router = ModelRouter::new(storage.pool().clone(), "primary");
    let (primary, _) = MockProvider::failing("primary", 400, "monthly quota exceeded");
    let (backup, _) = MockProvider::ok("backup");
    router.register(primary);
    router.register(backup);
    router.set_fallbacks("primary", &["backup"]);

    let outcome = router
        .route(&RouteRequest {
            prompt: "hello".to_owned(),
            ..RouteRequest::default()
        })
        .await
        .expect("quota errors fall through");
    assert_eq!(outcome.provider, "backup");
}

#[tokio::test]
async fn exhausted_chain_surfaces_last_error() {
    let storage = fresh().await;
    let mut router = ModelRouter::new(storage.pool().clone(), "primary");
    let (primary, _) = MockProvider::failing("primary", 429, "rate limit");
    let (backup, _) = MockProvider::failing("backup", 503, "overloaded");
    router.register(primary);
    router.register(backup);
    router.set_fallbacks("primary", &["backup"]);

    let err = router
        .route(&RouteRequest {
            prompt: "hello".to_owned(),
            ..RouteRequest::default()
        })
        .await
        .expect_err("every provider failed");

    match err {
        CoreError::ProviderHttp { status, .. } => assert_eq!(status, 503, "last error wins"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_retryable_error_stops_the_chain() {
    let storage = fresh().await;
    let mut router = ModelRouter::new(storage.pool().clone(), "primary");
    let (primary, _) = MockProvider::failing("primary", 400, "malformed request");
    let (backup, backup_calls) = MockProvider::ok("backup");
    router.register(primary);
    router.register(backup);
    router.set_fallbacks("primary", &["backup"]);

    let err = router
        .route(&RouteRequest {
            prompt: "hello".to_owned(),
            ..RouteRequest::default()
        })
        .await
        .expect_err("non-retryable surfaces immediately");

    assert!(matches!(err, CoreError::ProviderHttp { status: 400, .. }));
    assert_eq!(
        backup_calls.load(Ordering::SeqCst),
        0,
        "fallback never consulted"
    );
}

#[tokio::test]
async fn failed_providers_log_no_usage() {
    let storage = fresh().await;
    let mut router = ModelRouter::new(storage.pool().clone(), "primary");
    let (primary, _) = MockProvider::failing("primary", 429, "rate limit");
    let (backup, _) = MockProvider::ok("backup");
    router.register(primary);
    router.register(backup);
    router.set_fallbacks("primary", &["backup"]);

    router
        .route(&RouteRequest {
            prompt: "hello".to_owned(),
            ..RouteRequest::default()
        })
        .await
        .expect("route");

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM token_usage")
        .fetch_one(storage.pool())
        .await
        .expect("count");
    assert_eq!(count, 1, "only the successful call is accounted");
}
