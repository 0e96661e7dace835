//! OpenAI-compatible chat client backing the four language ports.
//! Tolerant of fenced JSON; every numeric field is clamped into range.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    ChatCompanion, CompanionContext, QuestionGenerator, QuestionProposal, RiskAssessment,
    RiskClassifier, SpeakerAttribution,
};
use crate::config::OracleConfig;
use crate::transcript::{format_dialogue, Speaker, Turn};

/// Turns of history shown to the classifier / generator / companion.
const PROMPT_HISTORY_TURNS: usize = 20;
/// Labeled segments shown to speaker attribution.
const ATTRIBUTION_CONTEXT: usize = 10;

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(cfg: &OracleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("call-guard/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_millis(cfg.timeout_ms.max(1)))
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }

    async fn complete(&self, system: &str, user: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("no LLM api key configured");
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("LLM request")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("LLM returned HTTP {status}");
        }
        let body: Resp = resp.json().await.context("LLM response body")?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("LLM returned no choices"))
    }
}

/// Strip markdown code fences and surrounding prose before the JSON payload.
pub fn extract_json(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        s = rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest).trim();
    }
    s
}

pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T> {
    let s = extract_json(content);
    serde_json::from_str(s).with_context(|| format!("unparseable oracle output: {s}"))
}

#[derive(Debug, Deserialize)]
struct RiskJson {
    risk_score: Option<f64>,
    confidence_score: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct QuestionJson {
    question: Option<String>,
    necessity_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SegmentJson {
    speaker: Option<String>,
    text: Option<String>,
}

const MAX_REASONING_CHARS: usize = 240;

/// Collapse whitespace (model output often carries newlines) and cap length.
pub fn sanitize_reasoning(input: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    let collapsed = re_ws.replace_all(input.trim(), " ");
    collapsed.chars().take(MAX_REASONING_CHARS).collect()
}

/// Missing scores fall back to the prior values.
fn risk_from_json(j: RiskJson, prior_risk: u8, prior_confidence: u8) -> RiskAssessment {
    let risk = j.risk_score.map(|v| v.round() as i64).unwrap_or(prior_risk as i64);
    let conf = j
        .confidence_score
        .map(|v| v.round() as i64)
        .unwrap_or(prior_confidence as i64);
    RiskAssessment::new(risk, conf, sanitize_reasoning(&j.reasoning))
}

const CLASSIFIER_SYSTEM: &str = "You monitor a live phone call for scams targeting the USER. \
Given prior scores, the previous transcript and one NEW chunk, return updated scores. \
risk_score (0-100) is how likely the call is a scam; confidence_score (0-100) is how much evidence supports it. \
USER_INPUT lines are the user's own private notes to you and are highly reliable. \
Respond ONLY with JSON: {\"risk_score\": int, \"confidence_score\": int, \"reasoning\": \"one short sentence\"}";

const QUESTION_SYSTEM: &str = "You help a person verify who they are talking to on a phone call. \
Propose ONE short, natural question the user could ask the caller to confirm or refute a scam, \
and rate how necessary asking it is right now (0-10). Respond ONLY with JSON: \
{\"question\": string or null, \"necessity_score\": int}";

const ATTRIBUTION_SYSTEM: &str = "You split raw phone-call transcript text into segments by speaker. \
The USER is the person who received the call; the CALLER initiated it. \
Respond ONLY with a JSON array of {\"speaker\": \"user\"|\"caller\", \"text\": string}.";

const COMPANION_SYSTEM: &str = "You are a calm, protective companion watching a live phone call with the user. \
Answer their question in 2-3 short sentences using the transcript and the risk scores as evidence.";

#[async_trait::async_trait]
impl RiskClassifier for LlmClient {
    async fn analyze(
        &self,
        history: &[Turn],
        new_turn: &Turn,
        prior_risk: u8,
        prior_confidence: u8,
    ) -> Result<RiskAssessment> {
        let user = format!(
            "Current risk_score: {prior_risk}\nCurrent confidence_score: {prior_confidence}\n\nPrevious history:\n{}\n\nNEW chunk:\n{}",
            format_dialogue(history, PROMPT_HISTORY_TURNS, "(No previous history)"),
            new_turn
        );
        let content = self.complete(CLASSIFIER_SYSTEM, &user, 0.0, 200).await?;
        let j: RiskJson = parse_json(&content)?;
        Ok(risk_from_json(j, prior_risk, prior_confidence))
    }

    fn name(&self) -> &'static str {
        "risk_classifier"
    }
}

#[async_trait::async_trait]
impl QuestionGenerator for LlmClient {
    async fn generate(
        &self,
        history: &[Turn],
        risk: u8,
        confidence: u8,
        last_speaker: Option<Speaker>,
    ) -> Result<QuestionProposal> {
        let last = last_speaker.map(|s| s.as_str()).unwrap_or("unknown");
        let user = format!(
            "risk_score: {risk}\nconfidence_score: {confidence}\nlast speaker: {last}\n\nTranscript:\n{}",
            format_dialogue(history, PROMPT_HISTORY_TURNS, "(No conversation history yet)")
        );
        let content = self.complete(QUESTION_SYSTEM, &user, 0.7, 150).await?;
        let j: QuestionJson = parse_json(&content)?;
        Ok(QuestionProposal::new(
            j.question,
            j.necessity_score.map(|v| v.round() as i64).unwrap_or(0),
        ))
    }

    fn name(&self) -> &'static str {
        "question_generator"
    }
}

#[async_trait::async_trait]
impl SpeakerAttribution for LlmClient {
    async fn label(&self, raw_text: &str, recent: &[Turn]) -> Result<Vec<Turn>> {
        let user = format!(
            "Previous conversation:\n{}\n\nNew transcript:\n\"{raw_text}\"",
            format_dialogue(recent, ATTRIBUTION_CONTEXT, "(No previous context)")
        );
        let content = self.complete(ATTRIBUTION_SYSTEM, &user, 0.1, 500).await?;
        let segments: Vec<SegmentJson> = parse_json(&content)?;
        Ok(segments
            .into_iter()
            .filter_map(|s| {
                let text = s.text?.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                let speaker = s
                    .speaker
                    .as_deref()
                    .map(Speaker::parse_lenient)
                    .unwrap_or(Speaker::Caller);
                Some(Turn::new(speaker, text))
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "speaker_attribution"
    }
}

#[async_trait::async_trait]
impl ChatCompanion for LlmClient {
    async fn reply(&self, query: &str, ctx: &CompanionContext) -> Result<String> {
        let user = format!(
            "Current risk score: {}/100\nConfidence score: {}/100\n\nRecent transcript:\n{}\n\nUser question: {query}",
            ctx.risk,
            ctx.confidence,
            format_dialogue(&ctx.history, PROMPT_HISTORY_TURNS, "(No conversation history yet)")
        );
        let content = self.complete(COMPANION_SYSTEM, &user, 0.3, 300).await?;
        let answer = content.trim().to_string();
        if answer.is_empty() {
            bail!("empty companion answer");
        }
        Ok(answer)
    }

    fn name(&self) -> &'static str {
        "companion"
    }
}
