// src/oracle/mod.rs
//! External collaborator ports: risk classifier, question generator, speaker
//! attribution, alert dispatcher and chat companion. Real providers live in
//! `llm`, deterministic stubs in `mock`.

pub mod llm;
pub mod mock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::blocklist::SuspiciousNumberStore;
use crate::config::GuardConfig;
use crate::notify::{dispatcher::ContactAlertDispatcher, notifier_from_env, Notifier};
use crate::transcript::{Speaker, Turn};

/// Classifier answer. Values are clamped into range on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk: u8,
    pub confidence: u8,
    pub reasoning: String,
}

impl RiskAssessment {
    pub fn new(risk: i64, confidence: i64, reasoning: impl Into<String>) -> Self {
        Self {
            risk: risk.clamp(0, 100) as u8,
            confidence: confidence.clamp(0, 100) as u8,
            reasoning: reasoning.into(),
        }
    }
}

/// Question generator answer: an optional question plus a 0..=10 necessity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionProposal {
    pub question: Option<String>,
    pub necessity: u8,
}

impl QuestionProposal {
    pub fn new(question: Option<String>, necessity: i64) -> Self {
        Self {
            question: question
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty()),
            necessity: necessity.clamp(0, 10) as u8,
        }
    }

    pub fn none() -> Self {
        Self::new(None, 0)
    }
}

/// Everything the dispatcher needs for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    pub risk: u8,
    pub confidence: u8,
    pub reasoning: String,
    pub contacts: Vec<String>,
    /// Present only when this call's number has not been reported yet.
    pub report_number: Option<String>,
}

/// Read-only context handed to the companion.
#[derive(Debug, Clone)]
pub struct CompanionContext {
    pub history: Vec<Turn>,
    pub risk: u8,
    pub confidence: u8,
}

#[async_trait::async_trait]
pub trait RiskClassifier: Send + Sync {
    /// `history` is the transcript BEFORE `new_turn`.
    async fn analyze(
        &self,
        history: &[Turn],
        new_turn: &Turn,
        prior_risk: u8,
        prior_confidence: u8,
    ) -> Result<RiskAssessment>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[Turn],
        risk: u8,
        confidence: u8,
        last_speaker: Option<Speaker>,
    ) -> Result<QuestionProposal>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait SpeakerAttribution: Send + Sync {
    /// Split `raw_text` into speaker-labeled segments, using `recent` as context.
    async fn label(&self, raw_text: &str, recent: &[Turn]) -> Result<Vec<Turn>>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Returns whether the alert was delivered. Reporting `report_number` to
    /// the blocklist is a side effect independent of delivery.
    async fn dispatch(&self, alert: &AlertRequest) -> Result<bool>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait ChatCompanion: Send + Sync {
    async fn reply(&self, query: &str, ctx: &CompanionContext) -> Result<String>;
    fn name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn RiskClassifier>;
pub type DynQuestions = Arc<dyn QuestionGenerator>;
pub type DynAttribution = Arc<dyn SpeakerAttribution>;
pub type DynDispatcher = Arc<dyn AlertDispatcher>;
pub type DynCompanion = Arc<dyn ChatCompanion>;

/// The full set of collaborators one process runs with.
#[derive(Clone)]
pub struct OraclePorts {
    pub classifier: DynClassifier,
    pub questions: DynQuestions,
    pub speakers: DynAttribution,
    pub alerts: DynDispatcher,
    pub companion: DynCompanion,
}

/// Factory: build ports according to config and environment variables.
///
/// * If `GUARD_ORACLE_MODE=mock` (or `oracle.provider = "mock"`), returns
///   deterministic keyword stubs.
/// * Else builds the OpenAI-compatible client for all four language ports.
///
/// Alerts always go through `ContactAlertDispatcher` with the notifier
/// selected from env.
pub fn build_ports(cfg: &GuardConfig, store: Arc<dyn SuspiciousNumberStore>) -> Result<OraclePorts> {
    let notifier: Arc<dyn Notifier> = notifier_from_env()?;
    let alerts: DynDispatcher = Arc::new(ContactAlertDispatcher::new(notifier, store));

    let mock_mode = std::env::var("GUARD_ORACLE_MODE")
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false)
        || cfg.oracle.provider.eq_ignore_ascii_case("mock");

    if mock_mode {
        tracing::info!(target: "oracle", "using keyword mock oracles");
        let m = Arc::new(mock::KeywordOracle::default());
        return Ok(OraclePorts {
            classifier: m.clone(),
            questions: m.clone(),
            speakers: m.clone(),
            alerts,
            companion: m,
        });
    }

    let client = Arc::new(llm::LlmClient::new(&cfg.oracle)?);
    tracing::info!(
        target: "oracle",
        provider = %cfg.oracle.provider,
        model = %cfg.oracle.model,
        key_len = cfg.oracle.api_key.len(),
        "LLM oracles configured"
    );
    Ok(OraclePorts {
        classifier: client.clone(),
        questions: client.clone(),
        speakers: client.clone(),
        alerts,
        companion: client,
    })
}
