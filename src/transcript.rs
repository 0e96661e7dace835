// src/transcript.rs
//! Turns: one speaker-attributed utterance of the call transcript.
//! Order of turns is conversation order; classifiers read it as dialogue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn. `UserInput` is text the protected user typed into
/// the companion surface, not something said on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Speaker {
    #[serde(alias = "user")]
    User,
    #[serde(alias = "caller")]
    Caller,
    #[serde(alias = "user_input")]
    UserInput,
}

impl Speaker {
    /// Lenient label parser used on oracle output. Anything unknown is the caller.
    pub fn parse_lenient(label: &str) -> Speaker {
        match label.trim().to_ascii_lowercase().as_str() {
            "user" => Speaker::User,
            "user_input" | "user-input" => Speaker::UserInput,
            _ => Speaker::Caller,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "USER",
            Speaker::Caller => "CALLER",
            Speaker::UserInput => "USER_INPUT",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable once created: fields are private, there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    speaker: Speaker,
    text: String,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }

    pub fn caller(text: impl Into<String>) -> Self {
        Self::new(Speaker::Caller, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn user_input(text: impl Into<String>) -> Self {
        Self::new(Speaker::UserInput, text)
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

/// Render the last `last_n` turns as `SPEAKER: text` lines, or `placeholder`
/// when there is nothing to show.
pub fn format_dialogue(turns: &[Turn], last_n: usize, placeholder: &str) -> String {
    if turns.is_empty() {
        return placeholder.to_string();
    }
    let start = turns.len().saturating_sub(last_n);
    turns[start..]
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_labels_parse_leniently() {
        assert_eq!(Speaker::parse_lenient(" User "), Speaker::User);
        assert_eq!(Speaker::parse_lenient("CALLER"), Speaker::Caller);
        assert_eq!(Speaker::parse_lenient("user_input"), Speaker::UserInput);
        assert_eq!(Speaker::parse_lenient("narrator"), Speaker::Caller);
    }

    #[test]
    fn turn_serializes_with_uppercase_speaker() {
        let t = Turn::caller("Hello, it's your grandson");
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["speaker"], serde_json::json!("CALLER"));
        assert_eq!(v["text"], serde_json::json!("Hello, it's your grandson"));

        let back: Turn = serde_json::from_str(r#"{"speaker":"user","text":"who?"}"#).unwrap();
        assert_eq!(back.speaker(), Speaker::User);
    }

    #[test]
    fn dialogue_keeps_only_the_tail() {
        let turns = vec![Turn::caller("one"), Turn::user("two"), Turn::caller("three")];
        assert_eq!(format_dialogue(&turns, 2, "-"), "USER: two\nCALLER: three");
        assert_eq!(format_dialogue(&[], 2, "(none)"), "(none)");
    }
}
