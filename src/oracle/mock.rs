// src/oracle/mock.rs
//! Deterministic keyword oracle. Used for demos, tests and
//! `GUARD_ORACLE_MODE=mock`; never calls the network.

use anyhow::Result;

use super::{
    ChatCompanion, CompanionContext, QuestionGenerator, QuestionProposal, RiskAssessment,
    RiskClassifier, SpeakerAttribution,
};
use crate::transcript::{Speaker, Turn};

const SCAM_KEYWORDS: &[(&str, i64)] = &[
    ("gift card", 30),
    ("wire", 20),
    ("bail", 25),
    ("jail", 20),
    ("urgent", 15),
    ("don't tell", 25),
    ("do not tell", 25),
    ("bitcoin", 30),
    ("social security", 25),
    ("bank account", 20),
    ("grandson", 10),
    ("police", 10),
    ("lawyer", 10),
    ("immediately", 10),
];

#[derive(Debug, Clone)]
pub struct KeywordOracle {
    /// Confidence gained per turn of evidence.
    pub confidence_step: i64,
    pub question_risk_floor: u8,
}

impl Default for KeywordOracle {
    fn default() -> Self {
        Self {
            confidence_step: 15,
            question_risk_floor: 40,
        }
    }
}

fn keyword_score(text: &str) -> (i64, Vec<&'static str>) {
    let lower = text.to_lowercase();
    let mut score = 0;
    let mut hits = Vec::new();
    for (kw, w) in SCAM_KEYWORDS {
        if lower.contains(kw) {
            score += w;
            hits.push(*kw);
        }
    }
    (score, hits)
}

#[async_trait::async_trait]
impl RiskClassifier for KeywordOracle {
    async fn analyze(
        &self,
        history: &[Turn],
        new_turn: &Turn,
        _prior_risk: u8,
        _prior_confidence: u8,
    ) -> Result<RiskAssessment> {
        let joined = history
            .iter()
            .chain(std::iter::once(new_turn))
            .map(Turn::text)
            .collect::<Vec<_>>()
            .join(" ");
        let (score, hits) = keyword_score(&joined);
        let turns = history.len() as i64 + 1;
        let reasoning = if hits.is_empty() {
            "no scam indicators so far".to_string()
        } else {
            format!("scam indicators: {}", hits.join(", "))
        };
        Ok(RiskAssessment::new(score, turns * self.confidence_step, reasoning))
    }

    fn name(&self) -> &'static str {
        "keyword_classifier"
    }
}

#[async_trait::async_trait]
impl QuestionGenerator for KeywordOracle {
    async fn generate(
        &self,
        _history: &[Turn],
        risk: u8,
        _confidence: u8,
        _last_speaker: Option<Speaker>,
    ) -> Result<QuestionProposal> {
        if risk >= self.question_risk_floor {
            Ok(QuestionProposal::new(
                Some("Can you tell me something only your real grandson would know?".into()),
                8,
            ))
        } else {
            Ok(QuestionProposal::new(None, 3))
        }
    }

    fn name(&self) -> &'static str {
        "keyword_questions"
    }
}

/// Sentences ending in `?` are attributed to the user, everything else to the caller.
#[async_trait::async_trait]
impl SpeakerAttribution for KeywordOracle {
    async fn label(&self, raw_text: &str, _recent: &[Turn]) -> Result<Vec<Turn>> {
        let mut out = Vec::new();
        let mut current = String::new();
        for ch in raw_text.chars() {
            current.push(ch);
            if matches!(ch, '.' | '!' | '?') {
                push_sentence(&mut out, &current);
                current.clear();
            }
        }
        push_sentence(&mut out, &current);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "keyword_attribution"
    }
}

fn push_sentence(out: &mut Vec<Turn>, sentence: &str) {
    let s = sentence.trim();
    if s.is_empty() {
        return;
    }
    let speaker = if s.ends_with('?') {
        Speaker::User
    } else {
        Speaker::Caller
    };
    out.push(Turn::new(speaker, s));
}

#[async_trait::async_trait]
impl ChatCompanion for KeywordOracle {
    async fn reply(&self, _query: &str, ctx: &CompanionContext) -> Result<String> {
        let verdict = match ctx.risk {
            0..=39 => "Nothing alarming so far, but stay alert.",
            40..=79 => "Some warning signs. Do not share money or personal details.",
            _ => "This looks like a scam. Hang up and call your family on a known number.",
        };
        Ok(format!(
            "Risk is {}/100 with {}/100 confidence. {verdict}",
            ctx.risk, ctx.confidence
        ))
    }

    fn name(&self) -> &'static str {
        "keyword_companion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keywords_raise_risk_and_turns_raise_confidence() {
        let o = KeywordOracle::default();
        let calm = o.analyze(&[], &Turn::caller("hi grandma"), 0, 0).await.unwrap();
        assert_eq!(calm.risk, 0);
        assert_eq!(calm.confidence, 15);

        let history = vec![Turn::caller("I'm in jail"), Turn::user("oh no")];
        let hot = o
            .analyze(&history, &Turn::caller("buy a gift card, don't tell mom"), 0, 0)
            .await
            .unwrap();
        assert_eq!(hot.risk, 75);
        assert_eq!(hot.confidence, 45);
        assert!(hot.reasoning.contains("gift card"));
    }

    #[tokio::test]
    async fn attribution_splits_sentences() {
        let o = KeywordOracle::default();
        let turns = o
            .label("Grandma it's me. Who is this? I need help", &[])
            .await
            .unwrap();
        let speakers: Vec<_> = turns.iter().map(Turn::speaker).collect();
        assert_eq!(speakers, vec![Speaker::Caller, Speaker::User, Speaker::Caller]);
        assert_eq!(turns[2].text(), "I need help");
    }

    #[tokio::test]
    async fn questions_only_when_risky() {
        let o = KeywordOracle::default();
        let low = o.generate(&[], 10, 20, None).await.unwrap();
        assert_eq!((low.question, low.necessity), (None, 3));
        let high = o.generate(&[], 60, 20, Some(Speaker::Caller)).await.unwrap();
        assert_eq!(high.necessity, 8);
        assert!(high.question.is_some());
    }
}
