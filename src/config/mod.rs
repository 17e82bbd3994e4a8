// src/config/mod.rs
//! Application config: `$AUTOPILOT_CONFIG_PATH`, else `config/autopilot.toml`,
//! else built-in defaults. Every section is optional and sanitized on load.

pub mod llm;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::assets::AssetsConfig;
use crate::dispatch::ledger::DEFAULT_LEDGER_PATH;
use crate::dispatch::DispatchSettings;
use crate::media::MediaConfig;
use crate::notify::NotifyConfig;
use crate::opportunity::events::EventsConfig;
use crate::opportunity::selector::SelectorConfig;
use crate::opportunity::ScoringConfig;
use crate::schedule::DEFAULT_PUBLISH_HOUR;
use crate::tracker::TrackerConfig;
use crate::tts::TtsConfig;
pub use llm::LlmConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/autopilot.toml";
pub const ENV_CONFIG_PATH: &str = "AUTOPILOT_CONFIG_PATH";

fn default_token_dir() -> PathBuf {
    PathBuf::from("config")
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}
fn default_attempt_timeout_secs() -> u64 {
    900
}
fn default_error_skip_threshold() -> u32 {
    3
}
fn default_min_uploads() -> u32 {
    6
}
fn default_max_uploads() -> u32 {
    10
}
fn default_publish_hour() -> u32 {
    DEFAULT_PUBLISH_HOUR
}

/// `[dispatch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Directory holding `credentials_<n>_token.json` files.
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Failures in one day after which an identity is skipped.
    #[serde(default = "default_error_skip_threshold")]
    pub error_skip_threshold: u32,
    #[serde(default = "default_min_uploads")]
    pub min_uploads_per_identity: u32,
    #[serde(default = "default_max_uploads")]
    pub max_uploads_per_identity: u32,
    /// Upload as private with a `publishAt` at the next evening slot.
    #[serde(default)]
    pub schedule_publish: bool,
    #[serde(default = "default_publish_hour")]
    pub publish_hour: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            token_dir: default_token_dir(),
            ledger_path: default_ledger_path(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            error_skip_threshold: default_error_skip_threshold(),
            min_uploads_per_identity: default_min_uploads(),
            max_uploads_per_identity: default_max_uploads(),
            schedule_publish: false,
            publish_hour: default_publish_hour(),
        }
    }
}

impl DispatchConfig {
    pub fn sanitize(&mut self) {
        if self.attempt_timeout_secs == 0 {
            self.attempt_timeout_secs = default_attempt_timeout_secs();
        }
        if self.error_skip_threshold == 0 {
            self.error_skip_threshold = default_error_skip_threshold();
        }
        if self.min_uploads_per_identity > self.max_uploads_per_identity {
            // swap to keep a valid interval
            std::mem::swap(&mut self.min_uploads_per_identity, &mut self.max_uploads_per_identity);
        }
        if self.publish_hour > 23 {
            self.publish_hour = default_publish_hour();
        }
    }

    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            error_skip_threshold: self.error_skip_threshold,
            min_uploads_per_identity: self.min_uploads_per_identity,
            max_uploads_per_identity: self.max_uploads_per_identity,
        }
    }
}

fn default_api_key() -> String {
    "ENV".to_string()
}

/// `[youtube]` section: data API key for search and statistics.
/// Uploads use the per-identity OAuth tokens instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    /// "ENV" means: read YOUTUBE_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl YouTubeConfig {
    pub fn sanitize(&mut self) {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("YOUTUBE_API_KEY").unwrap_or_default();
        }
    }

    /// `None` when no key is configured.
    pub fn key(&self) -> Option<String> {
        let k = self.api_key.trim();
        (!k.is_empty()).then(|| k.to_string())
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
}

impl AppConfig {
    /// Resolve the path, read it if present, sanitize.
    ///
    /// An explicit `$AUTOPILOT_CONFIG_PATH` that cannot be read is an error;
    /// a missing default file just means defaults.
    pub fn load() -> anyhow::Result<Self> {
        match env::var(ENV_CONFIG_PATH) {
            Ok(p) if !p.trim().is_empty() => Self::from_path(Path::new(p.trim())),
            _ => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_path(default)
                } else {
                    info!("no config file at {}; using defaults", DEFAULT_CONFIG_PATH);
                    let mut cfg = Self::default();
                    cfg.sanitize();
                    Ok(cfg)
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let cfg = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        info!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Resolve "ENV" secrets and replace out-of-range values with defaults.
    pub fn sanitize(&mut self) {
        self.dispatch.sanitize();
        self.llm.sanitize();
        self.tts.sanitize();
        self.assets.sanitize();
        self.media.sanitize();
        self.notify.sanitize();
        self.youtube.sanitize();
        self.events.sanitize();
        if self.tracker.balance_days == 0 {
            warn!("tracker.balance_days = 0; using 30");
            self.tracker.balance_days = 30;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.dispatch.error_skip_threshold, 3);
        assert_eq!(cfg.dispatch.ledger_path, PathBuf::from("data/youtube_quota_tracking.json"));
        assert_eq!(cfg.media.segment_secs, 5.0);
        assert_eq!(cfg.tracker.balance_days, 30);
        assert_eq!(cfg.api.port, 8080);
    }

    #[test]
    fn dispatch_values_are_sanitized() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [dispatch]
            attempt_timeout_secs = 0
            min_uploads_per_identity = 12
            max_uploads_per_identity = 4
            publish_hour = 30
            "#,
        )
        .unwrap();
        let s = cfg.dispatch.settings();
        assert_eq!(s.attempt_timeout, Duration::from_secs(900));
        assert_eq!((s.min_uploads_per_identity, s.max_uploads_per_identity), (4, 12));
        assert_eq!(cfg.dispatch.publish_hour, 18);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(AppConfig::from_toml_str("[dispatch\n").is_err());
    }
}
