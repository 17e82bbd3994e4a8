// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.7
}
fn default_daily_limit() -> u32 {
    200
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/llm")
}

/// `[llm]` section: any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" | "groq" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY / GROQ_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the provider's base URL (must end before `/chat/completions`).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Real completions per day; cache hits are free.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: default_api_key(),
            model: default_model(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            daily_limit: default_daily_limit(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl LlmConfig {
    pub fn key_env_var(&self) -> &'static str {
        match self.provider.as_str() {
            "groq" => "GROQ_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    pub fn endpoint_base(&self) -> String {
        if let Some(b) = self.base_url.as_deref().filter(|b| !b.trim().is_empty()) {
            return b.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "groq" => "https://api.groq.com/openai/v1".to_string(),
            _ => "https://api.openai.com/v1".to_string(),
        }
    }

    /// Normalize provider, resolve "ENV" and clamp out-of-range values.
    /// A missing key is left empty; the client then reports `LlmError::MissingKey`.
    pub fn sanitize(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
        if !matches!(self.provider.as_str(), "openai" | "groq") {
            self.provider = default_provider();
        }

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var(self.key_env_var()).unwrap_or_default();
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.model.trim().is_empty() {
            self.model = default_model();
        }
    }
}
