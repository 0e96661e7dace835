// src/worker.rs
//! Per-session single-writer queue.
//!
//! Every mutation of a call's transcript and scores goes through one worker
//! task that processes turns strictly in arrival order, whether they came
//! from audio or from the companion chat. The worker runs the engine on a
//! working copy and commits it back under the session lock, so readers are
//! never blocked for the duration of a port call.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use crate::engine::{Decision, DecisionEngine};
use crate::error::GuardError;
use crate::session::{ChatRole, SessionSnapshot, SessionState};
use crate::transcript::Turn;

const QUEUE_DEPTH: usize = 64;

/// Shared handle to one live call's state. The transport connection owns the
/// only long-lived `Arc`; the registry keeps a weak reference.
pub struct SessionHandle {
    id: String,
    state: Arc<Mutex<SessionState>>,
    turns: mpsc::Sender<Turn>,
    shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    /// Start the worker. Decisions for every processed turn are delivered on
    /// the returned receiver in processing order.
    pub fn spawn(
        id: impl Into<String>,
        state: SessionState,
        engine: Arc<DecisionEngine>,
    ) -> (Arc<Self>, mpsc::Receiver<Decision>) {
        let id = id.into();
        let state = Arc::new(Mutex::new(state));
        let (turn_tx, turn_rx) = mpsc::channel::<Turn>(QUEUE_DEPTH);
        let (decision_tx, decision_rx) = mpsc::channel::<Decision>(QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_worker(
            id.clone(),
            state.clone(),
            engine,
            turn_rx,
            decision_tx,
            shutdown_rx,
        ));

        let handle = Arc::new(Self {
            id,
            state,
            turns: turn_tx,
            shutdown: shutdown_tx,
        });
        (handle, decision_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a turn behind everything already submitted for this call.
    pub async fn submit(&self, turn: Turn) -> Result<(), GuardError> {
        if self.is_closed() {
            return Err(GuardError::SessionNotFound(self.id.clone()));
        }
        self.turns
            .send(turn)
            .await
            .map_err(|_| GuardError::SessionNotFound(self.id.clone()))
    }

    /// Read under the session lock.
    pub async fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.read(SessionState::snapshot).await
    }

    /// Append one companion exchange (user query, assistant answer).
    pub async fn record_chat(&self, query: impl Into<String>, answer: impl Into<String>) {
        let mut guard = self.state.lock().await;
        guard.push_chat(ChatRole::User, query);
        guard.push_chat(ChatRole::Assistant, answer);
    }

    /// Stop the worker; an in-flight turn is discarded, not committed.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_worker(
    id: String,
    state: Arc<Mutex<SessionState>>,
    engine: Arc<DecisionEngine>,
    mut turns: mpsc::Receiver<Turn>,
    decisions: mpsc::Sender<Decision>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let turn = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = turns.recv() => match next {
                Some(t) => t,
                None => break,
            },
        };

        let mut working = state.lock().await.clone();
        let decision = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            d = engine.process_turn(turn, &mut working) => d,
        };
        if *shutdown.borrow() {
            break;
        }
        state.lock().await.commit(working);

        debug!(
            target: "call",
            session = %id,
            risk = decision.risk_score,
            confidence = decision.confidence_score,
            action = ?decision.action,
            "turn committed"
        );
        if decisions.send(decision).await.is_err() {
            // nobody listens anymore; state stays current for readers
            debug!(target: "call", session = %id, "decision receiver gone");
        }
    }
    info!(target: "call", session = %id, "session worker stopped");
}
