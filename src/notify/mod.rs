// src/notify/mod.rs
//! Publish outcome notifications. Discord is the only sink; without a
//! webhook URL everything here is a no-op.

pub mod discord;

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, warn};

pub use discord::DiscordNotifier;

fn default_webhook() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u8 {
    3
}
fn default_true() -> bool {
    true
}

/// `[notify]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// "ENV" means: read DISCORD_WEBHOOK_URL. Empty disables notifications.
    #[serde(default = "default_webhook")]
    pub discord_webhook: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_true")]
    pub on_success: bool,
    #[serde(default = "default_true")]
    pub on_exhaustion: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            discord_webhook: default_webhook(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            on_success: true,
            on_exhaustion: true,
        }
    }
}

impl NotifyConfig {
    pub fn sanitize(&mut self) {
        if self.discord_webhook.trim().eq_ignore_ascii_case("env") {
            self.discord_webhook = env::var("DISCORD_WEBHOOK_URL").unwrap_or_default();
        }
        self.discord_webhook = self.discord_webhook.trim().to_string();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if self.max_retries == 0 {
            self.max_retries = 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PublishEvent {
    Published {
        title: String,
        url: String,
        format: String,
        identity: u32,
        attempts: usize,
    },
    PoolExhausted {
        title: String,
        format: String,
        detail: String,
    },
}

impl PublishEvent {
    pub fn title(&self) -> String {
        match self {
            PublishEvent::Published { format, .. } => format!("Published ({format})"),
            PublishEvent::PoolExhausted { format, .. } => format!("Upload quota exhausted ({format})"),
        }
    }

    pub fn description(&self) -> String {
        match self {
            PublishEvent::Published {
                title,
                url,
                identity,
                attempts,
                ..
            } => format!(
                "**Title:** {title}\n**URL:** {url}\n**Account:** {identity} (attempt {attempts})"
            ),
            PublishEvent::PoolExhausted { title, detail, .. } => {
                format!("**Title:** {title}\n**Reason:** {detail}\nTry again after the daily reset.")
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Notifier {
    discord: Option<DiscordNotifier>,
    on_success: bool,
    on_exhaustion: bool,
}

impl Notifier {
    pub fn from_config(cfg: &NotifyConfig) -> Self {
        let discord = (!cfg.discord_webhook.is_empty()).then(|| {
            DiscordNotifier::new(cfg.discord_webhook.clone())
                .with_timeout(cfg.timeout_secs)
                .with_retries(cfg.max_retries)
        });
        Self {
            discord,
            on_success: cfg.on_success,
            on_exhaustion: cfg.on_exhaustion,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.discord.is_some()
    }

    fn wants(&self, event: &PublishEvent) -> bool {
        match event {
            PublishEvent::Published { .. } => self.on_success,
            PublishEvent::PoolExhausted { .. } => self.on_exhaustion,
        }
    }

    /// Delivery failures are logged, never returned.
    pub async fn notify(&self, event: &PublishEvent) {
        let Some(discord) = &self.discord else {
            debug!(target: "pipeline", "notifications disabled");
            return;
        };
        if !self.wants(event) {
            return;
        }
        if let Err(e) = discord.send(event).await {
            warn!(target: "pipeline", error = %e, "discord notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn webhook_resolves_from_env() {
        env::set_var("DISCORD_WEBHOOK_URL", " https://discord.test/hook ");
        let mut cfg = NotifyConfig::default();
        cfg.sanitize();
        assert_eq!(cfg.discord_webhook, "https://discord.test/hook");
        assert!(Notifier::from_config(&cfg).is_enabled());
        env::remove_var("DISCORD_WEBHOOK_URL");

        let mut cfg = NotifyConfig::default();
        cfg.sanitize();
        assert!(!Notifier::from_config(&cfg).is_enabled());
    }

    #[test]
    fn event_text() {
        let e = PublishEvent::Published {
            title: "Peace in the storm".into(),
            url: "https://www.youtube.com/watch?v=abc".into(),
            format: "shorts".into(),
            identity: 2,
            attempts: 3,
        };
        assert_eq!(e.title(), "Published (shorts)");
        assert!(e.description().contains("**Account:** 2 (attempt 3)"));
    }

    #[tokio::test]
    async fn disabled_notifier_is_a_noop() {
        Notifier::disabled()
            .notify(&PublishEvent::PoolExhausted {
                title: "t".into(),
                format: "tutorial".into(),
                detail: "d".into(),
            })
            .await;
    }
}
