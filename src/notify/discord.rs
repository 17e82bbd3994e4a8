//! Discord webhook sink for publish events.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::PublishEvent;

const USERNAME: &str = "Video Autopilot";
const GREEN: u32 = 0x2ecc71;
const RED: u32 = 0xe74c3c;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    http: Client,
    timeout: Duration,
    attempts: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            http: Client::new(),
            timeout: Duration::from_secs(5),
            attempts: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }

    /// Total deliveries tried, including the first.
    pub fn with_retries(mut self, attempts: u8) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub async fn send(&self, event: &PublishEvent) -> Result<()> {
        let payload = WebhookPayload::from_event(event);
        let mut attempt = 0u8;
        loop {
            attempt += 1;
            let outcome = self
                .http
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await
                .map_err(|e| anyhow!("webhook request: {e}"))
                .and_then(|rsp| {
                    rsp.error_for_status()
                        .map(|_| ())
                        .map_err(|e| anyhow!("webhook status: {e}"))
                });
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(_) => tokio::time::sleep(backoff(attempt)).await,
            }
        }
    }
}

/// 500ms, 1s, 2s, ... capped at 32s.
fn backoff(attempt: u8) -> Duration {
    Duration::from_millis(500u64 << attempt.saturating_sub(1).min(6))
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    username: &'static str,
    embeds: Vec<Embed>,
}

impl WebhookPayload {
    fn from_event(event: &PublishEvent) -> Self {
        let (color, url) = match event {
            PublishEvent::Published { url, .. } => (GREEN, Some(url.clone())),
            PublishEvent::PoolExhausted { .. } => (RED, None),
        };
        Self {
            username: USERNAME,
            embeds: vec![Embed {
                title: event.title(),
                description: event.description(),
                color,
                url,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(2000));
        assert_eq!(backoff(50), Duration::from_millis(32_000));
    }

    #[test]
    fn published_embed_links_the_video() {
        let e = PublishEvent::Published {
            title: "Be still".into(),
            url: "https://www.youtube.com/watch?v=x1".into(),
            format: "meditation".into(),
            identity: 4,
            attempts: 1,
        };
        let v = serde_json::to_value(WebhookPayload::from_event(&e)).unwrap();
        assert_eq!(v["username"], USERNAME);
        assert_eq!(v["embeds"][0]["color"], GREEN);
        assert_eq!(v["embeds"][0]["url"], "https://www.youtube.com/watch?v=x1");
    }

    #[test]
    fn exhaustion_embed_is_red_without_link() {
        let e = PublishEvent::PoolExhausted {
            title: "t".into(),
            format: "shorts".into(),
            detail: "all identities exhausted".into(),
        };
        let v = serde_json::to_value(WebhookPayload::from_event(&e)).unwrap();
        assert_eq!(v["embeds"][0]["color"], RED);
        assert!(v["embeds"][0].get("url").is_none());
    }

    #[tokio::test]
    async fn unreachable_webhook_errors() {
        let n = DiscordNotifier::new("http://127.0.0.1:9/hook")
            .with_timeout(1)
            .with_retries(1);
        let e = PublishEvent::PoolExhausted {
            title: "t".into(),
            format: "shorts".into(),
            detail: "d".into(),
        };
        assert!(n.send(&e).await.is_err());
    }
}
