// src/opportunity/events.rs
//! Live trending events from news RSS feeds, turned into candidate
//! opportunities for the selector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use metrics::counter;
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use super::Opportunity;

/// Signals a headline gets when the feed carries no numbers of its own.
pub const NEWS_SEARCH_VOLUME: u64 = 50_000;
pub const NEWS_TREND_VELOCITY: f64 = 100.0;
pub const NEWS_ENGAGEMENT: u64 = 10_000;

fn default_true() -> bool {
    true
}
fn default_feeds() -> Vec<String> {
    [
        "https://rss.nytimes.com/services/xml/rss/nyt/HomePage.xml",
        "https://feeds.bbci.co.uk/news/rss.xml",
        "https://www.cnbc.com/id/100003114/device/rss/rss.html",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_per_feed() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    10
}

/// `[events]` section. An empty feed list disables discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_feeds")]
    pub feeds: Vec<String>,
    /// Newest items taken from each feed.
    #[serde(default = "default_per_feed")]
    pub per_feed: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feeds: default_feeds(),
            per_feed: default_per_feed(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EventsConfig {
    pub fn sanitize(&mut self) {
        self.feeds = self
            .feeds
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if self.per_feed == 0 {
            self.per_feed = default_per_feed();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.feeds.is_empty()
    }
}

/// Something that knows what is trending right now.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(&self, now: DateTime<Local>) -> Result<Vec<Opportunity>>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Whole days between `published` and `now`. Undated or future items count
/// as brand new.
pub fn freshness_days(published: Option<DateTime<FixedOffset>>, now: DateTime<Local>) -> f64 {
    published
        .map(|p| now.signed_duration_since(p).num_days().max(0) as f64)
        .unwrap_or(0.0)
}

fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// First `limit` titled items of one RSS document.
pub fn parse_feed(xml: &str, limit: usize, now: DateTime<Local>) -> Result<Vec<Opportunity>> {
    let rss: Rss = from_str(&scrub_html_entities(xml)).context("parsing rss xml")?;
    let out = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = it.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
            let published = it
                .pub_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok());
            Some(
                Opportunity::new(title)
                    .with_search_volume(NEWS_SEARCH_VOLUME)
                    .with_trend_velocity(NEWS_TREND_VELOCITY)
                    .with_engagement(NEWS_ENGAGEMENT)
                    .with_freshness_days(freshness_days(published, now)),
            )
        })
        .take(limit)
        .collect();
    Ok(out)
}

/// Drop repeated headlines, comparing trimmed lowercase labels.
pub fn dedupe(events: Vec<Opportunity>) -> Vec<Opportunity> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert(e.label.trim().to_lowercase()))
        .collect()
}

pub struct RssEventSource {
    feeds: Vec<String>,
    per_feed: usize,
    http: reqwest::Client,
}

impl RssEventSource {
    pub fn new(cfg: &EventsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building rss http client")?;
        Ok(Self {
            feeds: cfg.feeds.clone(),
            per_feed: cfg.per_feed,
            http,
        })
    }

    async fn fetch_feed(&self, url: &str, now: DateTime<Local>) -> Result<Vec<Opportunity>> {
        let body = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("rss http get()")?
            .text()
            .await
            .context("rss http .text()")?;
        parse_feed(&body, self.per_feed, now)
    }
}

#[async_trait]
impl EventSource for RssEventSource {
    /// A failing feed is skipped; only all feeds failing is an error.
    async fn fetch(&self, now: DateTime<Local>) -> Result<Vec<Opportunity>> {
        let mut events = Vec::new();
        let mut last_err = None;
        for url in &self.feeds {
            match self.fetch_feed(url, now).await {
                Ok(mut items) => events.append(&mut items),
                Err(e) => {
                    warn!(target: "scoring", feed = %url, error = ?e, "event feed failed");
                    counter!("event_feed_errors_total").increment(1);
                    last_err = Some(e);
                }
            }
        }
        if events.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        let events = dedupe(events);
        counter!("events_discovered_total").increment(events.len() as u64);
        info!(
            target: "scoring",
            count = events.len(),
            feeds = self.feeds.len(),
            "news events tracked"
        );
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}
