// src/analytics.rs
//! View/like/comment counts for tracked videos via `videos.list`.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::tracker::{Tracker, VideoStats};

const VIDEOS_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/videos";
/// `videos.list` accepts at most 50 ids per call.
const MAX_IDS_PER_CALL: usize = 50;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    id: String,
    #[serde(default)]
    statistics: Statistics,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

fn count(v: &Option<String>) -> u64 {
    v.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
}

pub fn parse_stats(body: &str) -> Result<HashMap<String, VideoStats>> {
    let resp: ListResponse = serde_json::from_str(body).context("videos.list json")?;
    Ok(resp
        .items
        .into_iter()
        .map(|i| {
            let s = &i.statistics;
            let stats = VideoStats {
                views: count(&s.view_count),
                likes: count(&s.like_count),
                comments: count(&s.comment_count),
            };
            (i.id, stats)
        })
        .collect())
}

pub struct Analytics {
    http: reqwest::Client,
    api_key: String,
}

impl Analytics {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }

    pub async fn fetch_stats(&self, ids: &[String]) -> Result<HashMap<String, VideoStats>> {
        if self.api_key.is_empty() {
            bail!("YOUTUBE_API_KEY is not set");
        }
        let mut out = HashMap::new();
        for chunk in ids.chunks(MAX_IDS_PER_CALL) {
            let joined = chunk.join(",");
            let resp = self
                .http
                .get(VIDEOS_ENDPOINT)
                .query(&[("part", "statistics"), ("id", joined.as_str()), ("key", self.api_key.as_str())])
                .send()
                .await
                .context("videos.list request")?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                bail!("videos.list returned {status}");
            }
            out.extend(parse_stats(&body)?);
        }
        Ok(out)
    }

    /// Store a fresh sample for every tracked video the API knows about.
    /// Returns the number of videos updated.
    pub async fn refresh_all(&self, tracker: &Tracker, now: NaiveDateTime) -> Result<usize> {
        let ids: Vec<String> = tracker.all_videos()?.into_iter().map(|v| v.video_id).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let stats = self.fetch_stats(&ids).await?;
        let mut updated = 0;
        for id in &ids {
            match stats.get(id) {
                Some(s) => {
                    tracker.update_performance(id, *s, now)?;
                    updated += 1;
                }
                None => warn!(video_id = %id, "no statistics returned"),
            }
        }
        info!(updated, total = ids.len(), "video stats refreshed");
        Ok(updated)
    }
}
