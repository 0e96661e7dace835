// src/error.rs
//! Error taxonomy for the call pipeline.
//!
//! Port implementations return `anyhow::Result`; the engine and the call
//! driver classify failures into `GuardError` so callers can tell a fatal
//! transport drop from a recoverable oracle hiccup.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Transcription/audio link dropped. Fatal to the call.
    #[error("transport error: {0}")]
    Transport(String),

    /// An external port failed or returned unparseable output. Recoverable.
    #[error("oracle `{port}` failed: {reason}")]
    Oracle { port: &'static str, reason: String },

    /// An external port did not answer within its deadline. Recoverable.
    #[error("oracle `{port}` timed out after {after_ms}ms")]
    Timeout { port: &'static str, after_ms: u64 },

    /// No live call under this id (or the call already ended).
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl GuardError {
    pub fn transport(e: impl std::fmt::Display) -> Self {
        GuardError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_port() {
        let t = GuardError::Timeout {
            port: "risk_classifier",
            after_ms: 10,
        };
        assert_eq!(t.to_string(), "oracle `risk_classifier` timed out after 10ms");
        let o = GuardError::Oracle {
            port: "question_generator",
            reason: "bad json".into(),
        };
        assert_eq!(o.to_string(), "oracle `question_generator` failed: bad json");
        assert_eq!(
            GuardError::transport("socket closed").to_string(),
            "transport error: socket closed"
        );
    }
}
