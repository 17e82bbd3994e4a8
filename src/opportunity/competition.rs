// src/opportunity/competition.rs
//! Competitor-count lookup, run by the selector before scoring so the
//! scorer itself never touches the network.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use super::Opportunity;

/// Live search results are capped here before scoring.
pub const MAX_COMPETITORS: u64 = 1000;

const YOUTUBE_SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

#[async_trait]
pub trait CompetitionEstimator: Send + Sync {
    /// Number of competing videos for this opportunity. Never fails;
    /// implementations degrade to an estimate.
    async fn estimate(&self, opportunity: &Opportunity) -> u64;

    fn name(&self) -> &'static str;
}

/// Offline estimate from label specificity: long, specific labels face
/// less competition than one- or two-word topics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    pub fn estimate_label(label: &str, emotion: Option<&str>) -> u64 {
        let event_words = label.split_whitespace().count();
        let emotion_words = emotion.map(|e| e.split_whitespace().count()).unwrap_or(0);
        if event_words > 3 && emotion_words > 1 {
            5
        } else if event_words > 2 {
            50
        } else {
            200
        }
    }
}

#[async_trait]
impl CompetitionEstimator for HeuristicEstimator {
    async fn estimate(&self, o: &Opportunity) -> u64 {
        Self::estimate_label(&o.label, o.emotion.as_deref())
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// YouTube Data API search estimator (`pageInfo.totalResults`).
/// Without an API key, or on any API failure, it falls back to [`HeuristicEstimator`].
pub struct YouTubeSearchEstimator {
    http: reqwest::Client,
    api_key: Option<String>,
    query_prefix: String,
}

impl YouTubeSearchEstimator {
    pub fn new(api_key: Option<String>, query_prefix: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            query_prefix: query_prefix.into(),
        })
    }

    fn query_for(&self, o: &Opportunity) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.query_prefix.trim().is_empty() {
            parts.push(self.query_prefix.trim());
        }
        if let Some(e) = o.emotion.as_deref() {
            parts.push(e);
        }
        parts.push(o.label.as_str());
        parts.join(" ")
    }

    async fn search_total(&self, key: &str, query: &str) -> anyhow::Result<u64> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "pageInfo", default)]
            page_info: PageInfo,
        }
        #[derive(Deserialize, Default)]
        struct PageInfo {
            #[serde(rename = "totalResults", default)]
            total_results: u64,
        }

        let resp = self
            .http
            .get(YOUTUBE_SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", "50"),
                ("q", query),
                ("key", key),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: Resp = resp.json().await?;
        Ok(body.page_info.total_results)
    }
}

#[async_trait]
impl CompetitionEstimator for YouTubeSearchEstimator {
    async fn estimate(&self, o: &Opportunity) -> u64 {
        let Some(key) = self.api_key.as_deref() else {
            return HeuristicEstimator::estimate_label(&o.label, o.emotion.as_deref());
        };
        let query = self.query_for(o);
        match self.search_total(key, &query).await {
            Ok(n) => {
                info!(target: "scoring", %query, results = n, "competition check");
                n.min(MAX_COMPETITORS)
            }
            Err(e) => {
                warn!(target: "scoring", %query, error = %e, "competition check failed; using heuristic");
                HeuristicEstimator::estimate_label(&o.label, o.emotion.as_deref())
            }
        }
    }

    fn name(&self) -> &'static str {
        "youtube"
    }
}

/// Fill in `competitor_count` where the source did not supply one.
pub async fn enrich(estimator: &dyn CompetitionEstimator, candidates: &mut [Opportunity]) {
    for o in candidates.iter_mut().filter(|o| o.competitor_count.is_none()) {
        o.competitor_count = Some(estimator.estimate(o).await);
    }
}
