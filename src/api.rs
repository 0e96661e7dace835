use std::sync::Arc;

use futures::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::blocklist::{anon_id, SuspiciousLookup, SuspiciousNumberStore};
use crate::call::{self, CallContext, CallInput, CallOutput, CallParams, ClientMessage};
use crate::error::GuardError;
use crate::oracle::{CompanionContext, DynCompanion};
use crate::transcript::Turn;
use crate::wakeword::{self, WakeDetected, WakeWord, DEFAULT_WAKE_WORD};

/// Reply used when the companion port is unavailable.
pub const COMPANION_FALLBACK: &str =
    "I can't analyze the call right now. If anything feels off, hang up and call your family on a number you already know.";

#[derive(Clone)]
pub struct AppState {
    pub call: CallContext,
    pub companion: DynCompanion,
    pub numbers: Arc<dyn SuspiciousNumberStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws/call", get(ws_call))
        .route("/ws/wakeword", get(ws_wakeword))
        .route("/chat", post(chat))
        .route("/sessions/{id}", get(get_session))
        .route("/api/check-number", get(check_number))
        .route("/api/report-number", post(report_number))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: msg.into() })).into_response()
}

// ---------- call transport ----------

#[derive(Debug, Default, Deserialize)]
struct CallQuery {
    session_id: Option<String>,
    caller: Option<String>,
    contacts: Option<String>,
    sample_rate: Option<u32>,
}

impl From<CallQuery> for CallParams {
    fn from(q: CallQuery) -> Self {
        CallParams {
            session_id: q.session_id,
            caller: q.caller,
            contacts: q
                .contacts
                .as_deref()
                .map(CallParams::parse_contacts)
                .unwrap_or_default(),
            sample_rate: q.sample_rate,
        }
    }
}

async fn ws_call(
    State(state): State<AppState>,
    Query(q): Query<CallQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = CallParams::from(q);
    let ctx = state.call.clone();
    ws.on_upgrade(move |socket| serve_socket(ctx, params, socket))
}

async fn serve_socket(ctx: CallContext, params: CallParams, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let inbound = Box::pin(stream.filter_map(|msg| future::ready(decode_frame(msg))));
    let outbound = Box::pin(sink.with(|out: CallOutput| future::ready(encode_frame(&out))));

    if let Err(e) = call::run_call(ctx, params, inbound, outbound).await {
        warn!(target: "call", error = %e, "call transport closed with error");
    }
}

fn decode_frame(
    msg: Result<Message, shuttle_axum::axum::Error>,
) -> Option<Result<CallInput, GuardError>> {
    match msg {
        Ok(Message::Binary(bytes)) => Some(Ok(CallInput::Audio(bytes.to_vec()))),
        Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(m) => Some(Ok(m.into())),
            Err(e) => {
                warn!(target: "call", "ignoring malformed text frame: {e}");
                None
            }
        },
        Ok(Message::Close(_)) => Some(Ok(CallInput::Close)),
        Ok(_) => None,
        Err(e) => Some(Err(GuardError::transport(e))),
    }
}

fn encode_frame(out: &CallOutput) -> Result<Message, shuttle_axum::axum::Error> {
    serde_json::to_string(out)
        .map(|s| Message::Text(s.into()))
        .map_err(shuttle_axum::axum::Error::new)
}

// ---------- voice activation ----------

#[derive(Debug, Default, Deserialize)]
struct WakeQuery {
    sample_rate: Option<u32>,
    wake_word: Option<String>,
}

async fn ws_wakeword(
    State(state): State<AppState>,
    Query(q): Query<WakeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let word = WakeWord::new(q.wake_word.as_deref().unwrap_or(DEFAULT_WAKE_WORD));
    let transcriber = state.call.transcriber.clone();
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let inbound = Box::pin(stream.filter_map(|msg| future::ready(decode_frame(msg))));
        let mut outbound = sink.with(|out: WakeDetected| {
            future::ready(
                serde_json::to_string(&out)
                    .map(|s| Message::Text(s.into()))
                    .map_err(shuttle_axum::axum::Error::new),
            )
        });

        match wakeword::listen(transcriber, q.sample_rate, word, inbound, &mut outbound).await {
            Ok(detected) => info!(target: "wake", detected, "wake listener closed"),
            Err(e) => warn!(target: "wake", error = %e, "wake listener failed"),
        }
        let _ = outbound.into_inner().send(Message::Close(None)).await;
    })
}

// ---------- companion chat ----------

#[derive(Deserialize)]
struct ChatReq {
    session_id: String,
    query: String,
}

#[derive(Serialize)]
struct ChatResp {
    response: String,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatReq>) -> Response {
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query must not be empty");
    }
    let Some(handle) = state.call.registry.get(&body.session_id) else {
        return error_response(StatusCode::NOT_FOUND, "no active session");
    };

    let ctx = handle
        .read(|s| CompanionContext {
            history: s.history().to_vec(),
            risk: s.risk_score,
            confidence: s.confidence_score,
        })
        .await;

    // Same queue as the audio path: one writer per session.
    if let Err(e) = handle.submit(Turn::user_input(query.clone())).await {
        warn!(target: "call", session = %body.session_id, error = %e, "user input not queued");
    }

    let timeout = state.call.config.oracle_timeout();
    let answer = match tokio::time::timeout(timeout, state.companion.reply(&query, &ctx)).await {
        Ok(Ok(a)) => a,
        Ok(Err(e)) => {
            metrics::counter!("guard_oracle_failures_total", "port" => "companion").increment(1);
            warn!(target: "call", error = %format!("{e:#}"), "companion failed");
            COMPANION_FALLBACK.to_string()
        }
        Err(_) => {
            metrics::counter!("guard_oracle_failures_total", "port" => "companion").increment(1);
            warn!(target: "call", timeout_ms = timeout.as_millis() as u64, "companion timed out");
            COMPANION_FALLBACK.to_string()
        }
    };

    handle.record_chat(query, answer.clone()).await;
    Json(ChatResp { response: answer }).into_response()
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.call.registry.get(&id) {
        Some(handle) => Json(handle.snapshot().await).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no active session"),
    }
}

// ---------- suspicious numbers ----------

#[derive(Deserialize)]
struct CheckQuery {
    phone: String,
}

async fn check_number(State(state): State<AppState>, Query(q): Query<CheckQuery>) -> Response {
    match state.numbers.check(&q.phone).await {
        Ok(found) => Json::<SuspiciousLookup>(found).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, format!("{e:#}")),
    }
}

#[derive(Deserialize)]
struct ReportReq {
    phone: String,
}

#[derive(Serialize)]
struct ReportResp {
    report_count: u32,
}

async fn report_number(State(state): State<AppState>, Json(body): Json<ReportReq>) -> Response {
    match state.numbers.report(&body.phone).await {
        Ok(report_count) => {
            info!(target: "blocklist", id = %anon_id(&body.phone), report_count, "manual report");
            Json(ReportResp { report_count }).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, format!("{e:#}")),
    }
}
