// src/config/oracle.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_ms() -> u64 {
    8_000
}

/// Oracle (LLM provider) settings, the `[oracle]` table of `guard.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// "openai" (any OpenAI-compatible endpoint) | "mock"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from LLM_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Deadline for every port call (classifier, generator, attribution, dispatch).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: default_api_key(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl OracleConfig {
    /// Normalize provider and resolve the "ENV" api key placeholder.
    /// A missing key is not an error here; the client refuses calls instead.
    pub fn resolve(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("LLM_API_KEY").unwrap_or_default();
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            if !model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
        }
        if let Ok(url) = env::var("LLM_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
    }
}
