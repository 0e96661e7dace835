// src/lib.rs
// Public library surface for the binary, demos and integration tests.

pub mod api;
pub mod blocklist;
pub mod buffer;
pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod oracle;
pub mod registry;
pub mod session;
pub mod throttle;
pub mod transcript;
pub mod wakeword;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;
use shuttle_axum::axum::Router;

pub use crate::api::{router, AppState};
pub use crate::config::GuardConfig;
pub use crate::engine::{Action, Decision, DecisionEngine, Gate};
pub use crate::error::GuardError;
pub use crate::session::SessionState;
pub use crate::transcript::{Speaker, Turn};

use crate::blocklist::{Blocklist, SuspiciousNumberStore};
use crate::call::{CallContext, NullTranscriber, Transcriber};
use crate::oracle::{build_ports, OraclePorts};
use crate::registry::SessionRegistry;

/// Where the blocklist snapshot is kept unless `GUARD_BLOCKLIST_PATH` says otherwise.
pub const DEFAULT_BLOCKLIST_PATH: &str = "data/suspicious_numbers.json";

/// Assemble shared state from already-built collaborators.
pub fn build_state(
    cfg: GuardConfig,
    ports: OraclePorts,
    numbers: Arc<dyn SuspiciousNumberStore>,
    transcriber: Arc<dyn Transcriber>,
) -> AppState {
    let engine = Arc::new(DecisionEngine::new(&ports, &cfg));
    AppState {
        call: CallContext {
            registry: Arc::new(SessionRegistry::new()),
            engine,
            speakers: ports.speakers.clone(),
            transcriber,
            config: Arc::new(cfg),
        },
        companion: ports.companion,
        numbers,
    }
}

/// Full in-process app from env: config, ports, blocklist, metrics and routes.
pub async fn app() -> Result<Router> {
    let cfg = GuardConfig::from_env()?;

    let numbers: Arc<dyn SuspiciousNumberStore> = match std::env::var("GUARD_BLOCKLIST_PATH") {
        Ok(p) if p.trim().eq_ignore_ascii_case("memory") => Arc::new(Blocklist::in_memory()),
        Ok(p) if !p.trim().is_empty() => Arc::new(Blocklist::with_persistence(p.trim()).await),
        _ => Arc::new(Blocklist::with_persistence(DEFAULT_BLOCKLIST_PATH).await),
    };

    let ports = build_ports(&cfg, numbers.clone())?;
    tracing::info!(
        target: "call",
        alert_cooldown_secs = cfg.throttle.alert_cooldown_secs,
        question_cooldown_secs = cfg.throttle.question_cooldown_secs,
        min_words = cfg.buffer.min_words,
        oracle_timeout_ms = cfg.oracle.timeout_ms,
        "guard configured"
    );

    let state = build_state(cfg, ports, numbers, Arc::new(NullTranscriber));
    let metrics = crate::metrics::Metrics::init()?;
    Ok(api::router(state).merge(metrics.router()))
}
