// src/wakeword.rs
//! Voice activation: stream audio to the transcriber until the wake phrase is
//! heard, report it once and stop.
//!
//! Interim results count here; reacting early is the whole point.

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::call::{CallInput, Transcriber, TranscriptionLink, DEFAULT_SAMPLE_RATE};
use crate::error::GuardError;

pub const DEFAULT_WAKE_WORD: &str = "hello";

/// Made-up words need syllable matching; anything else is a plain substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeWord {
    Phrase(String),
    Kova,
}

impl WakeWord {
    pub fn new(raw: &str) -> Self {
        let w = raw.trim().to_lowercase();
        if w.contains("kova") {
            WakeWord::Kova
        } else if w.is_empty() {
            WakeWord::Phrase(DEFAULT_WAKE_WORD.to_string())
        } else {
            WakeWord::Phrase(w)
        }
    }

    pub fn matches(&self, transcript: &str) -> bool {
        let t = transcript.to_lowercase();
        match self {
            WakeWord::Phrase(p) => t.contains(p.as_str()),
            // speech-to-text spells "kova" many ways; require "activate" too
            WakeWord::Kova => {
                ["ko", "co"].iter().any(|s| t.contains(s))
                    && ["va", "vah", "ver"].iter().any(|s| t.contains(s))
                    && t.contains("activate")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WakeDetected {
    pub detected: bool,
    pub transcript: String,
}

/// Returns `Ok(true)` once the wake word was reported, `Ok(false)` when the
/// client left first.
pub async fn listen<I, O>(
    transcriber: Arc<dyn Transcriber>,
    sample_rate: Option<u32>,
    word: WakeWord,
    mut inbound: I,
    mut outbound: O,
) -> Result<bool, GuardError>
where
    I: Stream<Item = Result<CallInput, GuardError>> + Unpin,
    O: Sink<WakeDetected> + Unpin,
    O::Error: std::fmt::Display,
{
    let sample_rate = sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let TranscriptionLink { audio, mut results } = transcriber
        .open(sample_rate)
        .await
        .map_err(|e| GuardError::transport(format!("{} transcriber: {e:#}", transcriber.name())))?;
    debug!(target: "wake", sample_rate, ?word, "listening");

    let mut results_open = true;
    let heard = loop {
        tokio::select! {
            biased;

            res = results.recv(), if results_open => match res {
                Some(Ok(ev)) if word.matches(&ev.text) => break ev.text,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(GuardError::transport(format!("transcription failed: {e:#}"))),
                None => results_open = false,
            },

            msg = inbound.next() => match msg {
                None | Some(Ok(CallInput::Close)) => return Ok(false),
                Some(Err(e)) => return Err(e),
                Some(Ok(CallInput::Audio(bytes))) => {
                    if results_open && audio.send(bytes).await.is_err() {
                        return Err(GuardError::transport("transcriber stopped accepting audio"));
                    }
                }
                Some(Ok(CallInput::Transcript(ev))) => {
                    if word.matches(&ev.text) {
                        break ev.text;
                    }
                }
            },
        }
    };

    metrics::counter!("guard_wake_detections_total").increment(1);
    info!(target: "wake", "wake word detected");
    outbound
        .send(WakeDetected {
            detected: true,
            transcript: heard,
        })
        .await
        .map_err(GuardError::transport)?;
    Ok(true)
}
