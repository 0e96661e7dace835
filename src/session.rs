// src/session.rs
//! Per-call state: conversation history, scores, throttle timestamps and the
//! report-once latch. One `SessionState` per live call.

use serde::{Deserialize, Serialize};

use crate::oracle::RiskAssessment;
use crate::transcript::Turn;

/// Default cap on retained transcript turns (oldest dropped first).
pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of the companion chat (independent of the call transcript).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    transcript_history: Vec<Turn>,
    history_cap: usize,

    /// 0..=100, full replacement on every successful analysis.
    pub risk_score: u8,
    /// 0..=100, same update semantics as `risk_score`.
    pub confidence_score: u8,
    pub latest_reasoning: String,

    /// Epoch seconds; `0.0` means never.
    pub last_alert_time: f64,
    pub last_question_time: f64,

    /// True while the last analysis attempt failed and scores are stale.
    pub degraded: bool,

    suspicious_number_reported: bool,
    emergency_contacts: Vec<String>,
    caller_phone_number: Option<String>,

    pub chatbot_history: Vec<ChatMessage>,
}

/// Compact view delivered to the end user and to `/sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub risk_score: u8,
    pub confidence_score: u8,
    pub latest_reasoning: String,
    pub history_length: usize,
    pub chat_length: usize,
    pub degraded: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(None, Vec::new())
    }
}

impl SessionState {
    pub fn new(caller_phone_number: Option<String>, emergency_contacts: Vec<String>) -> Self {
        Self {
            transcript_history: Vec::new(),
            history_cap: MAX_HISTORY,
            risk_score: 0,
            confidence_score: 0,
            latest_reasoning: String::new(),
            last_alert_time: 0.0,
            last_question_time: 0.0,
            degraded: false,
            suspicious_number_reported: false,
            emergency_contacts,
            caller_phone_number: caller_phone_number.filter(|n| !n.trim().is_empty()),
            chatbot_history: Vec::new(),
        }
    }

    /// Override the retained-history cap (min 1).
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self.trim_history();
        self
    }

    pub fn history(&self) -> &[Turn] {
        &self.transcript_history
    }

    pub fn last_speaker(&self) -> Option<crate::transcript::Speaker> {
        self.transcript_history.last().map(Turn::speaker)
    }

    /// Append a turn; length stays <= cap afterwards.
    pub fn push_turn(&mut self, turn: Turn) {
        self.transcript_history.push(turn);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        if self.transcript_history.len() > self.history_cap {
            let excess = self.transcript_history.len() - self.history_cap;
            self.transcript_history.drain(0..excess);
        }
    }

    /// Replace scores and reasoning with a fresh classifier answer.
    pub fn apply_assessment(&mut self, a: RiskAssessment) {
        self.risk_score = a.risk.min(100);
        self.confidence_score = a.confidence.min(100);
        self.latest_reasoning = a.reasoning;
        self.degraded = false;
    }

    pub fn emergency_contacts(&self) -> &[String] {
        &self.emergency_contacts
    }

    pub fn caller_phone_number(&self) -> Option<&str> {
        self.caller_phone_number.as_deref()
    }

    pub fn number_reported(&self) -> bool {
        self.suspicious_number_reported
    }

    /// Caller number to hand to the dispatcher, or `None` once it was reported.
    pub fn pending_report(&self) -> Option<&str> {
        if self.suspicious_number_reported {
            None
        } else {
            self.caller_phone_number()
        }
    }

    /// Latch the report flag. Never resets for the life of the session.
    pub fn mark_reported(&mut self, attempted: bool) {
        self.suspicious_number_reported |= attempted;
    }

    pub fn push_chat(&mut self, role: ChatRole, content: impl Into<String>) {
        self.chatbot_history.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    /// Take over everything the decision pipeline owns from `worked`, keeping
    /// this instance's chat history (written concurrently by the companion).
    pub fn commit(&mut self, worked: SessionState) {
        let chat = std::mem::take(&mut self.chatbot_history);
        *self = SessionState {
            chatbot_history: chat,
            ..worked
        };
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            risk_score: self.risk_score,
            confidence_score: self.confidence_score,
            latest_reasoning: self.latest_reasoning.clone(),
            history_length: self.transcript_history.len(),
            chat_length: self.chatbot_history.len(),
            degraded: self.degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_capped_oldest_first() {
        let mut s = SessionState::default();
        for i in 0..150 {
            s.push_turn(Turn::caller(format!("turn {i}")));
        }
        assert_eq!(s.history().len(), MAX_HISTORY);
        assert_eq!(s.history()[0].text(), "turn 50");
        assert_eq!(s.history().last().unwrap().text(), "turn 149");
    }

    #[test]
    fn custom_cap_trims_existing_history() {
        let mut s = SessionState::default();
        for i in 0..10 {
            s.push_turn(Turn::user(format!("{i}")));
        }
        let s = s.with_history_cap(3);
        let texts: Vec<_> = s.history().iter().map(|t| t.text().to_string()).collect();
        assert_eq!(texts, vec!["7", "8", "9"]);
    }

    #[test]
    fn report_latch_never_resets() {
        let mut s = SessionState::new(Some("+15550100".into()), vec![]);
        assert_eq!(s.pending_report(), Some("+15550100"));
        s.mark_reported(true);
        assert_eq!(s.pending_report(), None);
        s.mark_reported(false);
        assert!(s.number_reported());
    }

    #[test]
    fn blank_caller_number_is_treated_as_absent() {
        let s = SessionState::new(Some("   ".into()), vec![]);
        assert_eq!(s.caller_phone_number(), None);
        assert_eq!(s.pending_report(), None);
    }

    #[test]
    fn commit_keeps_concurrent_chat_history() {
        let mut live = SessionState::default();
        let mut worked = live.clone();

        live.push_chat(ChatRole::User, "is this my grandson?");
        worked.push_turn(Turn::caller("send gift cards"));
        worked.risk_score = 90;

        live.commit(worked);
        assert_eq!(live.risk_score, 90);
        assert_eq!(live.history().len(), 1);
        assert_eq!(live.chatbot_history.len(), 1);
    }

    #[test]
    fn snapshot_reports_lengths() {
        let mut s = SessionState::default();
        s.push_turn(Turn::caller("hi"));
        s.push_chat(ChatRole::User, "q");
        s.push_chat(ChatRole::Assistant, "a");
        let snap = s.snapshot();
        assert_eq!(snap.history_length, 1);
        assert_eq!(snap.chat_length, 2);
        assert_eq!(snap.risk_score, 0);
    }
}
