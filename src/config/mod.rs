// src/config/mod.rs
//! Guard configuration: TOML file + env overrides.
//!
//! Lookup order:
//! 1) $GUARD_CONFIG_PATH (must exist)
//! 2) config/guard.toml (if present)
//! 3) built-in defaults
//!
//! Then individual `GUARD_*` env overrides are applied and values sanitized.

pub mod oracle;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use oracle::OracleConfig;

pub const DEFAULT_GUARD_CONFIG_PATH: &str = "config/guard.toml";
pub const ENV_GUARD_CONFIG_PATH: &str = "GUARD_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Alert gate: risk >= alert_risk AND confidence >= alert_confidence.
    pub alert_risk: u8,
    pub alert_confidence: u8,
    /// Question gate: confidence < question_confidence.
    pub question_confidence: u8,
    /// Generator necessity (0..=10) required to surface a question.
    pub min_necessity: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            alert_risk: 80,
            alert_confidence: 70,
            question_confidence: 50,
            min_necessity: 7,
        }
    }
}

/// Alert and question cooldowns are independent windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub alert_cooldown_secs: f64,
    pub question_cooldown_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            alert_cooldown_secs: 30.0,
            question_cooldown_secs: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: crate::session::MAX_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Whitespace tokens needed before a flush.
    pub min_words: usize,
    /// Labeled-context window: once it exceeds `context_cap`, keep the last `context_keep`.
    pub context_cap: usize,
    pub context_keep: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_words: 5,
            context_cap: 50,
            context_keep: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub thresholds: Thresholds,
    pub throttle: ThrottleConfig,
    pub history: HistoryConfig,
    pub buffer: BufferConfig,
    pub oracle: OracleConfig,
}

impl GuardConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading guard config from {}", path.display()))?;
        let cfg: GuardConfig = toml::from_str(&data)
            .with_context(|| format!("parsing guard config {}", path.display()))?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks, apply env overrides, sanitize.
    pub fn from_env() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_GUARD_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("GUARD_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_GUARD_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from_file(&default_p)?
            } else {
                GuardConfig::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.oracle.resolve();
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<f64>("GUARD_ALERT_COOLDOWN_SECS") {
            self.throttle.alert_cooldown_secs = v;
        }
        if let Some(v) = env_parse::<f64>("GUARD_QUESTION_COOLDOWN_SECS") {
            self.throttle.question_cooldown_secs = v;
        }
        if let Some(v) = env_parse::<usize>("GUARD_MIN_WORDS") {
            self.buffer.min_words = v;
        }
        if let Some(v) = env_parse::<u64>("GUARD_ORACLE_TIMEOUT_MS") {
            self.oracle.timeout_ms = v;
        }
    }

    /// Keep values inside their meaningful ranges.
    pub fn sanitize(&mut self) {
        let t = &mut self.thresholds;
        t.alert_risk = t.alert_risk.min(100);
        t.alert_confidence = t.alert_confidence.min(100);
        t.question_confidence = t.question_confidence.min(100);
        t.min_necessity = t.min_necessity.min(10);

        let th = &mut self.throttle;
        if !th.alert_cooldown_secs.is_finite() || th.alert_cooldown_secs < 0.0 {
            th.alert_cooldown_secs = ThrottleConfig::default().alert_cooldown_secs;
        }
        if !th.question_cooldown_secs.is_finite() || th.question_cooldown_secs < 0.0 {
            th.question_cooldown_secs = ThrottleConfig::default().question_cooldown_secs;
        }

        self.history.max_turns = self.history.max_turns.max(1);

        let b = &mut self.buffer;
        b.min_words = b.min_words.max(1);
        b.context_cap = b.context_cap.max(1);
        if b.context_keep > b.context_cap {
            // keep a valid window
            b.context_keep = b.context_cap;
        }

        if self.oracle.timeout_ms == 0 {
            self.oracle.timeout_ms = OracleConfig::default().timeout_ms;
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle.timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_match_documented_policy() {
        let c = GuardConfig::default();
        assert_eq!(c.thresholds.alert_risk, 80);
        assert_eq!(c.thresholds.alert_confidence, 70);
        assert_eq!(c.thresholds.question_confidence, 50);
        assert_eq!(c.thresholds.min_necessity, 7);
        assert_eq!(c.throttle.alert_cooldown_secs, 30.0);
        assert_eq!(c.throttle.question_cooldown_secs, 3.0);
        assert_eq!(c.history.max_turns, 100);
        assert_eq!(c.buffer.min_words, 5);
        assert_eq!((c.buffer.context_cap, c.buffer.context_keep), (50, 30));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: GuardConfig = toml::from_str(
            r#"
            [throttle]
            alert_cooldown_secs = 60

            [buffer]
            min_words = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.throttle.alert_cooldown_secs, 60.0);
        assert_eq!(cfg.throttle.question_cooldown_secs, 3.0);
        assert_eq!(cfg.buffer.min_words, 8);
        assert_eq!(cfg.thresholds.alert_risk, 80);
    }

    #[test]
    fn sanitize_repairs_bad_values() {
        let mut c = GuardConfig::default();
        c.thresholds.min_necessity = 99;
        c.throttle.alert_cooldown_secs = -1.0;
        c.buffer.context_keep = 80;
        c.history.max_turns = 0;
        c.sanitize();
        assert_eq!(c.thresholds.min_necessity, 10);
        assert_eq!(c.throttle.alert_cooldown_secs, 30.0);
        assert_eq!(c.buffer.context_keep, 50);
        assert_eq!(c.history.max_turns, 1);
    }

    #[serial_test::serial]
    #[test]
    fn env_path_and_overrides_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("guard.toml");
        fs::write(&p, "[thresholds]\nalert_risk = 90\n").unwrap();

        env::set_var(ENV_GUARD_CONFIG_PATH, p.display().to_string());
        env::set_var("GUARD_QUESTION_COOLDOWN_SECS", "7.5");
        let c = GuardConfig::from_env().unwrap();
        env::remove_var(ENV_GUARD_CONFIG_PATH);
        env::remove_var("GUARD_QUESTION_COOLDOWN_SECS");

        assert_eq!(c.thresholds.alert_risk, 90);
        assert_eq!(c.throttle.question_cooldown_secs, 7.5);
        assert_eq!(c.throttle.alert_cooldown_secs, 30.0);
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_path_is_an_error() {
        env::set_var(ENV_GUARD_CONFIG_PATH, "/definitely/not/here.toml");
        let res = GuardConfig::from_env();
        env::remove_var(ENV_GUARD_CONFIG_PATH);
        assert!(res.is_err());
    }
}
