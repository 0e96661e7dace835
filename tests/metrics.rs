// tests/metrics.rs
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

// Build full in-process app (mock oracles, in-memory blocklist).
async fn build_app() -> Router {
    std::env::set_var("GUARD_ORACLE_MODE", "mock");
    std::env::set_var("GUARD_BLOCKLIST_PATH", "memory");
    std::env::remove_var("ALERT_WEBHOOK_URL");
    std::env::remove_var("SMTP_HOST");
    call_guard::app()
        .await
        .expect("app() should build Router in tests")
}

#[serial_test::serial]
#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let app = build_app().await;

    // produce at least one counter sample
    let resp = app
        .clone()
        .oneshot(
            Request::post("/api/report-number")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"phone":"+15550104242"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in ["guard_numbers_reported_total"] {
        assert!(text.contains(needle), "missing series {needle} in:\n{text}");
    }
}

#[serial_test::serial]
#[tokio::test]
async fn app_can_be_built_twice_in_one_process() {
    let a = build_app().await;
    let b = build_app().await;

    for app in [a, b] {
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
