// src/call.rs
//! Call driver: connects one full-duplex transport (WebSocket in production,
//! plain channels in tests) to a session.
//!
//! Inbound audio goes to the `Transcriber`; finalized fragments go through the
//! `ChunkBuffer` and become turns on the session worker queue; decisions and
//! labeled segments flow back out. The session is published in the registry
//! for the lifetime of the call and withdrawn when the driver returns.
//!
//! The receive loop never waits on the analysis path: fragments are handed
//! to the segmenter with `try_send`, so a slow classifier backs up the
//! segmenter and worker queues but audio keeps flowing to the transcriber.

use anyhow::Result;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::blocklist::anon_id;
use crate::buffer::ChunkBuffer;
use crate::config::GuardConfig;
use crate::engine::{Decision, DecisionEngine};
use crate::error::GuardError;
use crate::oracle::DynAttribution;
use crate::registry::SessionRegistry;
use crate::session::SessionState;
use crate::transcript::Turn;
use crate::worker::SessionHandle;

const CHANNEL_DEPTH: usize = 64;
/// Finalized fragments waiting for the segmenter. When full, new fragments
/// are dropped instead of stalling the receive loop.
pub const FRAGMENT_BACKLOG: usize = 1024;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// One transcription result. Only `is_final` fragments are buffered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

/// Live link to a speech-to-text backend for one call.
pub struct TranscriptionLink {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub results: mpsc::Receiver<Result<TranscriptEvent>>,
}

#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn open(&self, sample_rate: u32) -> Result<TranscriptionLink>;
    fn name(&self) -> &'static str;
}

/// Discards audio and never produces results. Used when clients push
/// transcript text themselves.
pub struct NullTranscriber;

#[async_trait::async_trait]
impl Transcriber for NullTranscriber {
    async fn open(&self, sample_rate: u32) -> Result<TranscriptionLink> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (results_tx, results_rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::spawn(async move {
            let _keep_open = results_tx;
            let mut bytes = 0usize;
            while let Some(chunk) = audio_rx.recv().await {
                bytes += chunk.len();
            }
            debug!(target: "call", sample_rate, bytes, "null transcriber drained");
        });
        Ok(TranscriptionLink {
            audio: audio_tx,
            results: results_rx,
        })
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// What the transport delivers to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum CallInput {
    Audio(Vec<u8>),
    /// Client-side transcription result, injected as if it came from the transcriber.
    Transcript(TranscriptEvent),
    Close,
}

/// What the driver pushes back to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallOutput {
    Session { session_id: String },
    Transcript { segments: Vec<Turn> },
    Analysis(Decision),
    Error { message: String },
}

/// Text frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Transcript { text: String, is_final: bool },
}

impl From<ClientMessage> for CallInput {
    fn from(m: ClientMessage) -> Self {
        match m {
            ClientMessage::Transcript { text, is_final } => {
                CallInput::Transcript(TranscriptEvent { text, is_final })
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallParams {
    pub session_id: Option<String>,
    pub caller: Option<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
    pub sample_rate: Option<u32>,
}

impl CallParams {
    /// Comma separated contact list as found in a query string.
    pub fn parse_contacts(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Process-wide collaborators every call needs.
#[derive(Clone)]
pub struct CallContext {
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<DecisionEngine>,
    pub speakers: DynAttribution,
    pub transcriber: Arc<dyn Transcriber>,
    pub config: Arc<GuardConfig>,
}

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn new_session_id() -> String {
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("call-{:x}-{seq}", Utc::now().timestamp_millis())
}

/// Registry entry scoped to the driver: withdrawn and closed on drop.
struct Published {
    registry: Arc<SessionRegistry>,
    handle: Arc<SessionHandle>,
}

impl Drop for Published {
    fn drop(&mut self) {
        self.handle.close();
        self.registry.delete_if_same(self.handle.id(), &self.handle);
    }
}

async fn send_out<O>(out: &mut O, msg: CallOutput) -> Result<(), GuardError>
where
    O: Sink<CallOutput> + Unpin,
    O::Error: std::fmt::Display,
{
    out.send(msg).await.map_err(GuardError::transport)
}

/// Drive one call until the client closes, the transport fails or the
/// transcriber breaks. Pending buffered text and queued turns are discarded
/// when the call ends.
pub async fn run_call<I, O>(
    ctx: CallContext,
    params: CallParams,
    mut inbound: I,
    mut outbound: O,
) -> Result<(), GuardError>
where
    I: Stream<Item = Result<CallInput, GuardError>> + Unpin,
    O: Sink<CallOutput> + Unpin,
    O::Error: std::fmt::Display,
{
    let session_id = params
        .session_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(new_session_id);
    let caller_id = params.caller.as_deref().map(anon_id);

    let state = SessionState::new(params.caller.clone(), params.contacts.clone())
        .with_history_cap(ctx.config.history.max_turns);
    let (handle, mut decisions) = SessionHandle::spawn(&session_id, state, ctx.engine.clone());
    ctx.registry.save(&session_id, &handle);
    let _published = Published {
        registry: ctx.registry.clone(),
        handle: handle.clone(),
    };
    info!(
        target: "call",
        session = %session_id,
        caller = caller_id.as_deref().unwrap_or("-"),
        contacts = params.contacts.len(),
        "call started"
    );

    send_out(
        &mut outbound,
        CallOutput::Session {
            session_id: session_id.clone(),
        },
    )
    .await?;

    let sample_rate = params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let link = match ctx.transcriber.open(sample_rate).await {
        Ok(link) => link,
        Err(e) => {
            let err = GuardError::transport(format!("{} transcriber: {e:#}", ctx.transcriber.name()));
            let _ = send_out(
                &mut outbound,
                CallOutput::Error {
                    message: err.to_string(),
                },
            )
            .await;
            return Err(err);
        }
    };
    let TranscriptionLink { audio, mut results } = link;

    let (fragment_tx, fragment_rx) = mpsc::channel::<String>(FRAGMENT_BACKLOG);
    let (segment_tx, mut segment_rx) = mpsc::channel::<CallOutput>(CHANNEL_DEPTH);
    let segmenter = tokio::spawn(segment(
        ChunkBuffer::new(ctx.speakers.clone(), &ctx.config),
        fragment_rx,
        handle.clone(),
        segment_tx,
    ));

    let mut results_open = true;
    let mut decisions_open = true;

    let outcome = loop {
        tokio::select! {
            biased;

            Some(out) = segment_rx.recv() => {
                if let Err(e) = send_out(&mut outbound, out).await {
                    break Err(e);
                }
            }

            next = decisions.recv(), if decisions_open => match next {
                Some(decision) => {
                    if let Err(e) = send_out(&mut outbound, CallOutput::Analysis(decision)).await {
                        break Err(e);
                    }
                }
                None => decisions_open = false,
            },

            res = results.recv(), if results_open => match res {
                Some(Ok(ev)) => accept_fragment(&fragment_tx, &session_id, ev),
                Some(Err(e)) => {
                    let err = GuardError::transport(format!("transcription failed: {e:#}"));
                    let _ = send_out(&mut outbound, CallOutput::Error { message: err.to_string() }).await;
                    break Err(err);
                }
                None => {
                    debug!(target: "call", session = %session_id, "transcriber finished");
                    results_open = false;
                }
            },

            msg = inbound.next() => match msg {
                None | Some(Ok(CallInput::Close)) => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(CallInput::Audio(bytes))) => {
                    if results_open && audio.send(bytes).await.is_err() {
                        let err = GuardError::transport("transcriber stopped accepting audio");
                        let _ = send_out(&mut outbound, CallOutput::Error { message: err.to_string() }).await;
                        break Err(err);
                    }
                }
                Some(Ok(CallInput::Transcript(ev))) => accept_fragment(&fragment_tx, &session_id, ev),
            },
        }
    };

    segmenter.abort();
    handle.close();
    match &outcome {
        Ok(()) => info!(target: "call", session = %session_id, "call ended"),
        Err(e) => warn!(target: "call", session = %session_id, error = %e, "call torn down"),
    }
    outcome
}

fn accept_fragment(fragments: &mpsc::Sender<String>, session_id: &str, ev: TranscriptEvent) {
    if !ev.is_final || ev.text.trim().is_empty() {
        return;
    }
    match fragments.try_send(ev.text) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            metrics::counter!("guard_fragments_dropped_total").increment(1);
            warn!(target: "call", session = %session_id, backlog = FRAGMENT_BACKLOG, "analysis backlog full; fragment dropped");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(target: "call", session = %session_id, "segmenter gone; fragment dropped");
        }
    }
}

/// Owns the buffer: fragments in, labeled segments out and onto the worker queue.
async fn segment(
    mut buffer: ChunkBuffer,
    mut fragments: mpsc::Receiver<String>,
    handle: Arc<SessionHandle>,
    out: mpsc::Sender<CallOutput>,
) {
    while let Some(text) = fragments.recv().await {
        buffer.add(&text);
        if !buffer.should_flush() {
            continue;
        }
        let segments = buffer.flush().await;
        if segments.is_empty() {
            continue;
        }
        if out
            .send(CallOutput::Transcript {
                segments: segments.clone(),
            })
            .await
            .is_err()
        {
            return;
        }
        for turn in segments {
            if let Err(e) = handle.submit(turn).await {
                debug!(target: "call", error = %e, "session closed; stopping segmenter");
                return;
            }
        }
    }
}
