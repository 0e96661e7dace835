// src/engine.rs
//! # Decision Engine
//! Folds one turn into a session: analyze -> route -> {alert | question | idle}.
//!
//! `route` is pure and has no I/O, suitable for unit tests. `DecisionEngine`
//! wraps it with the port calls, each bounded by a deadline. Port failures
//! never escape `process_turn`: prior scores are kept, the turn is still
//! appended, and the decision is flagged `degraded`.

use metrics::counter;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::oracle::{AlertRequest, DynClassifier, DynDispatcher, DynQuestions, OraclePorts};
use crate::session::SessionState;
use crate::throttle::{now_secs, Cooldown};
use crate::transcript::Turn;

/// Which action class a throttle held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Alert,
    Question,
}

/// Routing outcome for one turn. Recomputed fresh every turn from scores and
/// the two timestamps; nothing else is remembered between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "gate")]
pub enum Action {
    Idle,
    Alert,
    Question,
    /// Gate condition held but its cooldown is still running. No side effect.
    Throttled(Gate),
}

/// The two throttle timestamps plus the routing instant (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamps {
    pub last_alert: f64,
    pub last_question: f64,
    pub now: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingPolicy {
    pub alert_risk: u8,
    pub alert_confidence: u8,
    pub question_confidence: u8,
    pub alert_cooldown: Cooldown,
    pub question_cooldown: Cooldown,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::from_config(&GuardConfig::default())
    }
}

impl RoutingPolicy {
    pub fn from_config(cfg: &GuardConfig) -> Self {
        Self {
            alert_risk: cfg.thresholds.alert_risk,
            alert_confidence: cfg.thresholds.alert_confidence,
            question_confidence: cfg.thresholds.question_confidence,
            alert_cooldown: Cooldown::new(cfg.throttle.alert_cooldown_secs),
            question_cooldown: Cooldown::new(cfg.throttle.question_cooldown_secs),
        }
    }
}

/// Fixed priority: alert gate first, then question gate, else idle.
///
/// With the default thresholds the two gates are mutually exclusive (alert
/// needs confidence >= 70, question needs < 50). A throttled alert is
/// terminal for the turn: it does not fall through to the question gate.
pub fn route(policy: &RoutingPolicy, risk: u8, confidence: u8, ts: Timestamps) -> Action {
    if risk >= policy.alert_risk && confidence >= policy.alert_confidence {
        return if policy.alert_cooldown.is_open(ts.last_alert, ts.now) {
            Action::Alert
        } else {
            Action::Throttled(Gate::Alert)
        };
    }
    if confidence < policy.question_confidence {
        return if policy.question_cooldown.is_open(ts.last_question, ts.now) {
            Action::Question
        } else {
            Action::Throttled(Gate::Question)
        };
    }
    Action::Idle
}

/// Result of one `process_turn`. The session passed in is updated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub risk_score: u8,
    pub confidence_score: u8,
    pub reasoning: String,
    pub suggested_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub necessity_score: Option<u8>,
    pub alert_sent: bool,
    pub action: Action,
    /// Analysis failed this turn; scores are the last known values.
    pub degraded: bool,
}

pub struct DecisionEngine {
    classifier: DynClassifier,
    questions: DynQuestions,
    alerts: DynDispatcher,
    policy: RoutingPolicy,
    min_necessity: u8,
    oracle_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(ports: &OraclePorts, cfg: &GuardConfig) -> Self {
        Self {
            classifier: ports.classifier.clone(),
            questions: ports.questions.clone(),
            alerts: ports.alerts.clone(),
            policy: RoutingPolicy::from_config(cfg),
            min_necessity: cfg.thresholds.min_necessity,
            oracle_timeout: cfg.oracle_timeout(),
        }
    }

    pub async fn process_turn(&self, turn: Turn, session: &mut SessionState) -> Decision {
        self.process_turn_at(turn, session, now_secs()).await
    }

    /// Same as `process_turn` with an explicit clock (epoch seconds).
    pub async fn process_turn_at(&self, turn: Turn, session: &mut SessionState, now: f64) -> Decision {
        counter!("guard_turns_total").increment(1);

        // 1) Analyze against the PRE-turn history, then append regardless of outcome.
        let analysis = self
            .bounded(
                self.classifier.name(),
                self.classifier.analyze(
                    session.history(),
                    &turn,
                    session.risk_score,
                    session.confidence_score,
                ),
            )
            .await;
        session.push_turn(turn);

        match analysis {
            Ok(a) => session.apply_assessment(a),
            Err(e) => {
                counter!("guard_oracle_failures_total", "port" => "risk_classifier").increment(1);
                warn!(
                    target: "engine",
                    error = %e,
                    risk = session.risk_score,
                    confidence = session.confidence_score,
                    "analysis failed; keeping prior scores"
                );
                session.degraded = true;
            }
        }

        let mut decision = Decision {
            risk_score: session.risk_score,
            confidence_score: session.confidence_score,
            reasoning: session.latest_reasoning.clone(),
            suggested_question: None,
            necessity_score: None,
            alert_sent: false,
            action: Action::Idle,
            degraded: session.degraded,
        };

        // 2) Route on post-analysis scores.
        let action = route(
            &self.policy,
            session.risk_score,
            session.confidence_score,
            Timestamps {
                last_alert: session.last_alert_time,
                last_question: session.last_question_time,
                now,
            },
        );
        decision.action = action;

        match action {
            Action::Alert => {
                decision.alert_sent = self.alert_branch(session, now).await;
            }
            Action::Question => {
                let (question, necessity) = self.question_branch(session, now).await;
                decision.suggested_question = question;
                decision.necessity_score = necessity;
            }
            Action::Throttled(gate) => {
                if gate == Gate::Alert {
                    counter!("guard_alerts_throttled_total").increment(1);
                }
                debug!(target: "engine", ?gate, "suppressed by cooldown");
            }
            Action::Idle => {}
        }

        decision
    }

    /// 3) Dispatch once. Timestamp and report latch update whatever delivery did.
    async fn alert_branch(&self, session: &mut SessionState, now: f64) -> bool {
        let report_number = session.pending_report().map(str::to_owned);
        let request = AlertRequest {
            risk: session.risk_score,
            confidence: session.confidence_score,
            reasoning: session.latest_reasoning.clone(),
            contacts: session.emergency_contacts().to_vec(),
            report_number,
        };

        let delivered = match self
            .bounded(self.alerts.name(), self.alerts.dispatch(&request))
            .await
        {
            Ok(d) => d,
            Err(e) => {
                counter!("guard_oracle_failures_total", "port" => "alert_dispatcher").increment(1);
                warn!(target: "engine", error = %e, "alert dispatch failed");
                false
            }
        };

        session.last_alert_time = now;
        session.mark_reported(request.report_number.is_some());
        counter!("guard_alerts_dispatched_total").increment(1);
        info!(
            target: "engine",
            risk = request.risk,
            confidence = request.confidence,
            delivered,
            reported = request.report_number.is_some(),
            "alert dispatched"
        );
        delivered
    }

    /// 4) Ask the generator; surface its question only above the necessity bar.
    async fn question_branch(&self, session: &mut SessionState, now: f64) -> (Option<String>, Option<u8>) {
        let proposal = self
            .bounded(
                self.questions.name(),
                self.questions.generate(
                    session.history(),
                    session.risk_score,
                    session.confidence_score,
                    session.last_speaker(),
                ),
            )
            .await;
        session.last_question_time = now;

        match proposal {
            Ok(p) => {
                let accepted = if p.necessity >= self.min_necessity {
                    p.question
                } else {
                    None
                };
                if accepted.is_some() {
                    counter!("guard_questions_suggested_total").increment(1);
                }
                debug!(target: "engine", necessity = p.necessity, accepted = accepted.is_some(), "question evaluated");
                (accepted, Some(p.necessity))
            }
            Err(e) => {
                counter!("guard_oracle_failures_total", "port" => "question_generator").increment(1);
                warn!(target: "engine", error = %e, "question generation failed");
                (None, None)
            }
        }
    }

    /// Run a port call under the oracle deadline, classifying failures.
    async fn bounded<T, F>(&self, port: &'static str, fut: F) -> Result<T, GuardError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.oracle_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(GuardError::Oracle {
                port,
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(GuardError::Timeout {
                port,
                after_ms: self.oracle_timeout.as_millis() as u64,
            }),
        }
    }
}
