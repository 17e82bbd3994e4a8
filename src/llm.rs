//! LLM text generation: an OpenAI-compatible chat completions client,
//! wrapped with a file cache and a per-day call limit.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::llm::LlmConfig;

const SYSTEM_PROMPT: &str = "You are a YouTube script writer specializing in Personal Finance, AI and \
calm spiritual content. Write engaging, informative scripts optimized for watch time.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no LLM api key (set {env})")]
    MissingKey { env: &'static str },
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("llm returned an empty completion")]
    EmptyCompletion,
    #[error("daily llm limit of {limit} calls reached")]
    DailyLimit { limit: u32 },
}

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;

    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynTextGenerator = Arc<dyn TextGenerator>;

/// Factory: build a generator according to config and environment variables.
///
/// * If `AUTOPILOT_LLM_MODE=mock`, returns a deterministic mock generator.
/// * Else builds the chat completions client wrapped with caching + daily limit.
pub fn build_generator(cfg: &LlmConfig) -> anyhow::Result<DynTextGenerator> {
    if std::env::var("AUTOPILOT_LLM_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        let mock = MockGenerator::new("Take one small step today. Write it down, then breathe.");
        return Ok(Arc::new(CachingGenerator::new(
            mock,
            cfg.cache_dir.clone(),
            cfg.daily_limit,
        )));
    }

    let client = ChatCompletionsClient::new(cfg)?;
    info!(
        provider = %cfg.provider,
        model = %cfg.model,
        key_len = cfg.api_key.len(),
        "llm client ready"
    );
    Ok(Arc::new(CachingGenerator::new(
        client,
        cfg.cache_dir.clone(),
        cfg.daily_limit,
    )))
}

// ------------------------------------------------------------
// Providers
// ------------------------------------------------------------

/// OpenAI-compatible chat completions (OpenAI, Groq, local gateways).
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    api_key: String,
    key_env: &'static str,
    model: String,
    url: String,
}

impl ChatCompletionsClient {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("video-autopilot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            key_env: cfg.key_env_var(),
            model: cfg.model.clone(),
            url: format!("{}/chat/completions", cfg.endpoint_base()),
        })
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingKey { env: self.key_env });
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
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens,
        };

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body: String = resp.text().await.unwrap_or_default().chars().take(300).collect();
            return Err(LlmError::Api { status, body });
        }
        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let content = content.trim().to_string();
        if content.is_empty() {
            Err(LlmError::EmptyCompletion)
        } else {
            Ok(content)
        }
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

/// Fixed reply for tests and offline runs.
#[derive(Clone)]
pub struct MockGenerator {
    pub fixed: String,
}

impl MockGenerator {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _prompt: &str, _max_tokens: u32, _t: f32) -> Result<String, LlmError> {
        Ok(self.fixed.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache + daily limit)
// ------------------------------------------------------------

const COUNTER_FILE: &str = "daily_count.json";

/// Completions are cached as `<cache_dir>/<key>.json`; only misses count
/// towards `daily_limit`, which resets at local midnight.
pub struct CachingGenerator<G: TextGenerator> {
    inner: G,
    cache_dir: PathBuf,
    daily_limit: u32,
    usage: Mutex<DailyUsage>,
}

impl<G: TextGenerator> CachingGenerator<G> {
    pub fn new(inner: G, cache_dir: PathBuf, daily_limit: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(dir = %cache_dir.display(), error = %e, "llm cache dir unavailable");
        }
        let usage = read_json::<DailyUsage>(&cache_dir.join(COUNTER_FILE))
            .unwrap_or_else(DailyUsage::today);
        Self {
            inner,
            cache_dir,
            daily_limit,
            usage: Mutex::new(usage),
        }
    }

    pub fn calls_today(&self) -> u32 {
        self.lock_usage().calls
    }

    /// Current-day usage; a stale day is reset in place.
    fn lock_usage(&self) -> std::sync::MutexGuard<'_, DailyUsage> {
        let mut g = self.usage.lock().unwrap_or_else(|p| p.into_inner());
        let today = Local::now().date_naive();
        if g.date != today {
            *g = DailyUsage { date: today, calls: 0 };
        }
        g
    }

    fn persist_usage(&self, usage: &DailyUsage) {
        if let Err(e) = write_json_atomic(&self.cache_dir.join(COUNTER_FILE), usage) {
            warn!(error = %e, "llm usage counter not saved");
        }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for CachingGenerator<G> {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let key = cache_key(self.inner.name(), prompt, max_tokens, temperature);
        let entry = self.cache_dir.join(format!("{key}.json"));
        if let Some(hit) = read_json::<CachedCompletion>(&entry) {
            debug!(%key, "llm cache hit");
            return Ok(hit.text);
        }

        if self.lock_usage().calls >= self.daily_limit {
            return Err(LlmError::DailyLimit {
                limit: self.daily_limit,
            });
        }

        let text = self.inner.generate(prompt, max_tokens, temperature).await?;
        if let Err(e) = write_json_atomic(&entry, &CachedCompletion { text: text.clone() }) {
            warn!(error = %e, "llm cache write failed");
        }
        let snapshot = {
            let mut g = self.lock_usage();
            g.calls = g.calls.saturating_add(1);
            g.clone()
        };
        self.persist_usage(&snapshot);
        Ok(text)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// First 12 bytes of SHA-256 over provider, parameters and prompt, as hex.
fn cache_key(provider: &str, prompt: &str, max_tokens: u32, temperature: f32) -> String {
    let mut h = Sha256::new();
    h.update(provider.as_bytes());
    h.update([0]);
    h.update(max_tokens.to_le_bytes());
    h.update(temperature.to_le_bytes());
    h.update(prompt.as_bytes());
    h.finalize()
        .iter()
        .take(12)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Serialize, Deserialize)]
struct CachedCompletion {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DailyUsage {
    date: NaiveDate,
    calls: u32,
}

impl DailyUsage {
    fn today() -> Self {
        Self {
            date: Local::now().date_naive(),
            calls: 0,
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    serde_json::from_str(&fs::read_to_string(path).ok()?).ok()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TextGenerator for Counting {
        async fn generate(&self, prompt: &str, _m: u32, _t: f32) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{prompt}#{n}"))
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn cache_hits_do_not_count_against_the_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let g = CachingGenerator::new(
            Counting {
                calls: AtomicU32::new(0),
            },
            tmp.path().to_path_buf(),
            2,
        );
        assert_eq!(g.generate("a", 100, 0.7).await.unwrap(), "a#0");
        assert_eq!(g.generate("a", 100, 0.7).await.unwrap(), "a#0");
        assert_eq!(g.calls_today(), 1);
        assert_eq!(g.generate("b", 100, 0.7).await.unwrap(), "b#1");
        let err = g.generate("c", 100, 0.7).await.unwrap_err();
        assert!(matches!(err, LlmError::DailyLimit { limit: 2 }));
        // different parameters are a different cache entry
        assert!(g.generate("a", 200, 0.7).await.is_err());
    }

    #[tokio::test]
    async fn missing_key_is_reported_without_a_request() {
        let cfg = LlmConfig {
            api_key: String::new(),
            ..LlmConfig::default()
        };
        let c = ChatCompletionsClient::new(&cfg).unwrap();
        let err = c.generate("hi", 10, 0.1).await.unwrap_err();
        assert!(matches!(err, LlmError::MissingKey { env: "OPENAI_API_KEY" }));
    }

    #[test]
    fn cache_key_is_stable_hex() {
        let a = cache_key("p", "prompt", 10, 0.5);
        assert_eq!(a, cache_key("p", "prompt", 10, 0.5));
        assert_eq!(a.len(), 24);
        assert_ne!(a, cache_key("p", "prompt", 11, 0.5));
    }
}
