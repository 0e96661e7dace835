// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /chat (unknown session, empty query, live session)
// - GET /sessions/{id}
// - POST /api/report-number + GET /api/check-number

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use call_guard::api::{self, COMPANION_FALLBACK};
use call_guard::blocklist::Blocklist;
use call_guard::call::NullTranscriber;
use call_guard::notify::{dispatcher::ContactAlertDispatcher, LogNotifier};
use call_guard::oracle::{mock::KeywordOracle, ChatCompanion, CompanionContext, OraclePorts};
use call_guard::worker::SessionHandle;
use call_guard::{build_state, AppState, GuardConfig, SessionState, Speaker};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

struct SilentCompanion;

#[async_trait::async_trait]
impl ChatCompanion for SilentCompanion {
    async fn reply(&self, _q: &str, _ctx: &CompanionContext) -> anyhow::Result<String> {
        anyhow::bail!("model overloaded")
    }
    fn name(&self) -> &'static str {
        "silent"
    }
}

fn test_state() -> AppState {
    let numbers = Arc::new(Blocklist::in_memory());
    let oracle = Arc::new(KeywordOracle::default());
    let ports = OraclePorts {
        classifier: oracle.clone(),
        questions: oracle.clone(),
        speakers: oracle.clone(),
        alerts: Arc::new(ContactAlertDispatcher::new(Arc::new(LogNotifier), numbers.clone())),
        companion: oracle,
    };
    build_state(GuardConfig::default(), ports, numbers, Arc::new(NullTranscriber))
}

fn test_router(state: &AppState) -> Router {
    api::router(state.clone())
}

async fn json_body(resp: shuttle_axum::axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse json")
}

fn post_json(uri: &str, payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router(&test_state());

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "OK", "health body should be 'OK'");
}

#[tokio::test]
async fn api_chat_unknown_session_is_404() {
    let app = test_router(&test_state());

    let resp = app
        .oneshot(post_json("/chat", json!({ "session_id": "nope", "query": "is this a scam?" })))
        .await
        .expect("oneshot /chat");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let v = json_body(resp).await;
    assert!(v.get("error").is_some(), "missing 'error'");
}

#[tokio::test]
async fn api_chat_empty_query_is_400() {
    let app = test_router(&test_state());

    let resp = app
        .oneshot(post_json("/chat", json!({ "session_id": "any", "query": "   " })))
        .await
        .expect("oneshot /chat");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_chat_on_live_session_answers_and_queues_user_input() {
    let state = test_state();
    let (handle, mut decisions) =
        SessionHandle::spawn("live-1", SessionState::default(), state.call.engine.clone());
    state.call.registry.save("live-1", &handle);
    let app = test_router(&state);

    let resp = app
        .oneshot(post_json(
            "/chat",
            json!({ "session_id": "live-1", "query": "He says he is my grandson, is it true?" }),
        ))
        .await
        .expect("oneshot /chat");
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    let answer = v["response"].as_str().expect("response string");
    assert!(answer.starts_with("Risk is 0/100"), "got: {answer}");

    // the query went through the worker as a USER_INPUT turn
    decisions.recv().await.expect("decision for user input");
    let (speakers, chat_len) = handle
        .read(|s| {
            (
                s.history().iter().map(|t| t.speaker()).collect::<Vec<_>>(),
                s.chatbot_history.len(),
            )
        })
        .await;
    assert_eq!(speakers, vec![Speaker::UserInput]);
    assert_eq!(chat_len, 2);
}

#[tokio::test]
async fn api_chat_companion_failure_uses_fallback_reply() {
    let mut state = test_state();
    state.companion = Arc::new(SilentCompanion);
    let (handle, _decisions) =
        SessionHandle::spawn("live-2", SessionState::default(), state.call.engine.clone());
    state.call.registry.save("live-2", &handle);

    let resp = test_router(&state)
        .oneshot(post_json("/chat", json!({ "session_id": "live-2", "query": "help" })))
        .await
        .expect("oneshot /chat");
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["response"], json!(COMPANION_FALLBACK));
}

#[tokio::test]
async fn api_session_snapshot_and_404() {
    let state = test_state();
    let (handle, _decisions) =
        SessionHandle::spawn("snap-1", SessionState::default(), state.call.engine.clone());
    state.call.registry.save("snap-1", &handle);
    let app = test_router(&state);

    let resp = app
        .clone()
        .oneshot(Request::get("/sessions/snap-1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    for key in ["risk_score", "confidence_score", "history_length", "chat_length", "degraded"] {
        assert!(v.get(key).is_some(), "missing '{key}'");
    }

    let resp = app
        .oneshot(Request::get("/sessions/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_report_then_check_number() {
    let app = test_router(&test_state());

    let resp = app
        .clone()
        .oneshot(Request::get("/api/check-number?phone=%2B15550109999").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!({ "found": false, "report_count": 0 }));

    for expected in 1..=2 {
        let resp = app
            .clone()
            .oneshot(post_json("/api/report-number", json!({ "phone": "+1 (555) 010-9999" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["report_count"], json!(expected));
    }

    let resp = app
        .oneshot(Request::get("/api/check-number?phone=%2B15550109999").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(resp).await, json!({ "found": true, "report_count": 2 }));
}

#[tokio::test]
async fn api_invalid_phone_is_400() {
    let app = test_router(&test_state());
    let resp = app
        .oneshot(post_json("/api/report-number", json!({ "phone": "unknown" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
