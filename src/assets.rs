// src/assets.rs
//! Stock footage from the Pexels video API, cached on disk by file name.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::content::VideoFormat;
use crate::opportunity::{ContentTone, Opportunity};

const PEXELS_VIDEO_SEARCH: &str = "https://api.pexels.com/videos/search";

fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("output/cache/stock_footage")
}
fn default_per_query() -> u32 {
    5
}
fn default_max_clips() -> usize {
    20
}
fn default_nature_queries() -> Vec<String> {
    [
        "peaceful river flowing",
        "beautiful forest nature",
        "ocean waves peaceful",
        "mountain landscape serene",
        "sunset nature beautiful",
        "lake reflection calm",
        "waterfall nature",
        "meadow flowers peaceful",
        "birds flying nature",
        "clouds sky peaceful",
    ]
    .map(String::from)
    .to_vec()
}
fn default_finance_queries() -> Vec<String> {
    ["money", "finance", "computer", "technology", "office", "business"]
        .map(String::from)
        .to_vec()
}

/// `[assets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// "ENV" means: read PEXELS_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_per_query")]
    pub per_query: u32,
    #[serde(default = "default_max_clips")]
    pub max_clips: usize,
    #[serde(default = "default_nature_queries")]
    pub nature_queries: Vec<String>,
    #[serde(default = "default_finance_queries")]
    pub finance_queries: Vec<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            cache_dir: default_cache_dir(),
            per_query: default_per_query(),
            max_clips: default_max_clips(),
            nature_queries: default_nature_queries(),
            finance_queries: default_finance_queries(),
        }
    }
}

impl AssetsConfig {
    pub fn sanitize(&mut self) {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("PEXELS_API_KEY").unwrap_or_default();
        }
        self.per_query = self.per_query.clamp(1, 80);
        if self.max_clips == 0 {
            self.max_clips = default_max_clips();
        }
        if self.nature_queries.is_empty() {
            self.nature_queries = default_nature_queries();
        }
        if self.finance_queries.is_empty() {
            self.finance_queries = default_finance_queries();
        }
    }
}

/// One downloadable rendition of a stock video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAsset {
    pub id: u64,
    pub url: String,
    pub quality: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
}

impl StockAsset {
    /// Cache file name; stable per source video.
    pub fn file_name(&self) -> String {
        format!("pexels_{}.mp4", self.id)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideo {
    id: u64,
    duration: Option<f64>,
    #[serde(default)]
    video_files: Vec<PexelsFile>,
}

#[derive(Debug, Deserialize)]
struct PexelsFile {
    quality: Option<String>,
    link: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// HD rendition if there is one, else the first.
fn best_rendition(video: PexelsVideo) -> Option<StockAsset> {
    let PexelsVideo {
        id,
        duration,
        mut video_files,
    } = video;
    let idx = video_files
        .iter()
        .position(|f| f.quality.as_deref() == Some("hd"))
        .or(if video_files.is_empty() { None } else { Some(0) })?;
    let f = video_files.swap_remove(idx);
    Some(StockAsset {
        id,
        url: f.link,
        quality: f.quality,
        width: f.width,
        height: f.height,
        duration_secs: duration,
    })
}

/// Parse a Pexels video search response body.
pub fn parse_search(body: &str) -> Result<Vec<StockAsset>> {
    let resp: SearchResponse = serde_json::from_str(body).context("pexels search json")?;
    Ok(resp.videos.into_iter().filter_map(best_rendition).collect())
}

/// Search queries for a format and topic.
pub fn queries_for(cfg: &AssetsConfig, format: VideoFormat, o: &Opportunity) -> Vec<String> {
    match format {
        VideoFormat::Tutorial => {
            let topic = o.label.to_lowercase();
            let mut q: Vec<String> = cfg.finance_queries.iter().take(3).cloned().collect();
            if topic.contains("ai") || topic.contains("chatgpt") {
                q.push("artificial intelligence".into());
                q.push("computer screen".into());
            }
            if topic.contains("budget") {
                q.push("calculator".into());
                q.push("spreadsheet".into());
            }
            q
        }
        VideoFormat::Shorts => match o.tone {
            Some(ContentTone::Positive) => vec!["sunrise".into()],
            _ => vec!["peaceful ocean waves".into()],
        },
        VideoFormat::Meditation => cfg.nature_queries.clone(),
    }
}

#[async_trait]
pub trait StockFootage: Send + Sync {
    async fn search(&self, query: &str, per_page: u32) -> Result<Vec<StockAsset>>;
    /// Download into `dir`; an existing file with the same name is reused.
    async fn download(&self, asset: &StockAsset, dir: &Path) -> Result<PathBuf>;
}

pub struct PexelsClient {
    http: reqwest::Client,
    api_key: String,
}

impl PexelsClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("video-autopilot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl StockFootage for PexelsClient {
    async fn search(&self, query: &str, per_page: u32) -> Result<Vec<StockAsset>> {
        if self.api_key.is_empty() {
            bail!("PEXELS_API_KEY is not set");
        }
        let resp = self
            .http
            .get(PEXELS_VIDEO_SEARCH)
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", query),
                ("per_page", &per_page.to_string()),
                ("orientation", "landscape"),
            ])
            .send()
            .await
            .with_context(|| format!("pexels search '{query}'"))?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("pexels search '{query}' returned {status}");
        }
        let assets = parse_search(&body)?;
        debug!(target: "pipeline", %query, found = assets.len(), "pexels search");
        Ok(assets)
    }

    async fn download(&self, asset: &StockAsset, dir: &Path) -> Result<PathBuf> {
        let dest = dir.join(asset.file_name());
        if dest.exists() {
            debug!(target: "pipeline", path = %dest.display(), "using cached clip");
            return Ok(dest);
        }
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let mut resp = self.http.get(&asset.url).send().await?.error_for_status()?;
        let tmp = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &dest).await?;
        info!(target: "pipeline", path = %dest.display(), "clip downloaded");
        Ok(dest)
    }
}

/// Search every query and download up to `max_clips` distinct videos.
/// Failures of single queries or downloads are logged and skipped.
pub async fn gather_footage(
    source: &dyn StockFootage,
    cfg: &AssetsConfig,
    queries: &[String],
) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for q in queries {
        if out.len() >= cfg.max_clips {
            break;
        }
        let assets = match source.search(q, cfg.per_query).await {
            Ok(a) => a,
            Err(e) => {
                warn!(target: "pipeline", query = %q, error = %e, "footage search failed");
                continue;
            }
        };
        for asset in assets {
            if out.len() >= cfg.max_clips {
                break;
            }
            if !seen.insert(asset.id) {
                continue;
            }
            match source.download(&asset, &cfg.cache_dir).await {
                Ok(p) => out.push(p),
                Err(e) => warn!(target: "pipeline", id = asset.id, error = %e, "clip download failed"),
            }
        }
    }
    info!(target: "pipeline", clips = out.len(), "footage gathered");
    out
}
