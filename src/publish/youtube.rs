// src/publish/youtube.rs
//! YouTube Data API v3 upload client.
//!
//! Each identity's token file is a Google "authorized user" JSON document
//! (`token`, `refresh_token`, `client_id`, `client_secret`, `token_uri`,
//! `expiry`). Access tokens are refreshed when missing or about to expire
//! and written back to the same file. Uploads use the resumable protocol in
//! fixed-size chunks.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::{SeekFrom, Write};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::{Artifact, PublishClient, PublishError, PublishedId, VideoMetadata};
use crate::dispatch::Identity;

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CHUNK_SIZE: usize = 8 * 1024 * 1024;
/// Consecutive 308s without progress before the upload is abandoned.
const MAX_STALLED_CHUNKS: u32 = 3;

/// Authorized-user token file as written by the provisioning script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default)]
    pub token: Option<String>,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredToken {
    pub fn load(path: &Path) -> Result<Self, PublishError> {
        let raw = fs::read_to_string(path).map_err(|source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| PublishError::Credential {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn save(&self, path: &Path) -> Result<(), PublishError> {
        let io = |source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        };
        let tmp = path.with_extension("json.tmp");
        let json =
            serde_json::to_string_pretty(self).map_err(|e| PublishError::Other(e.to_string()))?;
        let mut f = fs::File::create(&tmp).map_err(io)?;
        f.write_all(json.as_bytes()).map_err(io)?;
        fs::rename(&tmp, path).map_err(io)
    }

    /// Usable access token, valid for at least another minute.
    pub fn fresh_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.expiry {
            Some(exp) if exp - now > ChronoDuration::seconds(60) => Some(token),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RefreshResp {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorInner,
}

#[derive(Deserialize)]
struct ApiErrorInner {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

/// Turn a Google error body into a message that keeps the machine-readable
/// reasons (`uploadLimitExceeded`, `quotaExceeded`, ...).
pub fn describe_api_error(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(b) => {
            let reasons: Vec<&str> = b
                .error
                .errors
                .iter()
                .map(|r| r.reason.as_str())
                .filter(|r| !r.is_empty())
                .collect();
            if reasons.is_empty() {
                b.error.message
            } else {
                format!("{} ({})", b.error.message, reasons.join(", "))
            }
        }
        Err(_) => body.chars().take(300).collect(),
    }
}

async fn api_error(resp: reqwest::Response) -> PublishError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    PublishError::Api {
        status,
        message: describe_api_error(&body),
    }
}

pub struct YouTubeUploader {
    http: Client,
}

impl YouTubeUploader {
    pub fn new() -> Result<Self, PublishError> {
        let http = Client::builder()
            .user_agent(concat!("video-autopilot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http })
    }

    async fn access_token(&self, identity: &Identity) -> Result<String, PublishError> {
        let mut stored = StoredToken::load(&identity.credential)?;
        let now = Utc::now();
        if let Some(t) = stored.fresh_access_token(now) {
            return Ok(t.to_string());
        }

        debug!(target: "dispatch", identity = identity.id, "refreshing access token");
        let resp = self
            .http
            .post(&stored.token_uri)
            .form(&[
                ("client_id", stored.client_id.as_str()),
                ("client_secret", stored.client_secret.as_str()),
                ("refresh_token", stored.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Auth(format!("{status}: {}", describe_api_error(&body))));
        }
        let fresh: RefreshResp = resp.json().await?;
        stored.token = Some(fresh.access_token.clone());
        stored.expiry = Some(now + ChronoDuration::seconds(fresh.expires_in.unwrap_or(3600)));
        stored.save(&identity.credential)?;
        Ok(fresh.access_token)
    }

    fn request_body(metadata: &VideoMetadata) -> serde_json::Value {
        let mut status = json!({
            "privacyStatus": metadata.privacy,
            "selfDeclaredMadeForKids": metadata.made_for_kids,
        });
        if let Some(at) = metadata.publish_at {
            status["privacyStatus"] = json!("private");
            status["publishAt"] = json!(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        }
        json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.description,
                "tags": metadata.tags,
                "categoryId": metadata.category_id,
            },
            "status": status,
        })
    }

    async fn open_session(
        &self,
        token: &str,
        metadata: &VideoMetadata,
        total: u64,
    ) -> Result<String, PublishError> {
        let resp = self
            .http
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", total.to_string())
            .json(&Self::request_body(metadata))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PublishError::Other("upload session has no Location header".into()))
    }
}

/// Where to continue after a 308: one past the last byte the server reports
/// in `Range: bytes=0-N`, or the start when it reports none. `None` for a
/// header that cannot be read.
fn resume_offset(range: Option<&str>) -> Option<u64> {
    let Some(range) = range else {
        return Some(0);
    };
    let (start, last) = range.trim().strip_prefix("bytes=")?.split_once('-')?;
    if start.trim() != "0" {
        return None;
    }
    last.trim().parse::<u64>().ok()?.checked_add(1)
}

#[async_trait]
impl PublishClient for YouTubeUploader {
    async fn attempt_publish(
        &self,
        identity: &Identity,
        artifact: &Artifact,
        metadata: &VideoMetadata,
    ) -> Result<PublishedId, PublishError> {
        let path = &artifact.video_path;
        let io = |source| PublishError::Io {
            path: path.clone(),
            source,
        };
        let total = tokio::fs::metadata(path).await.map_err(io)?.len();

        let token = self.access_token(identity).await?;
        let session = self.open_session(&token, metadata, total).await?;
        info!(target: "dispatch", identity = identity.id, bytes = total, "upload session opened");

        let mut file = tokio::fs::File::open(path).await.map_err(io)?;
        let mut offset: u64 = 0;
        let mut stalled = 0u32;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..]).await.map_err(io)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            let end = offset + filled as u64;
            let range = if total == 0 {
                "bytes */0".to_string()
            } else {
                format!("bytes {}-{}/{}", offset, end.saturating_sub(1), total)
            };

            let resp = self
                .http
                .put(&session)
                .bearer_auth(&token)
                .header(header::CONTENT_RANGE, range)
                .body(buf[..filled].to_vec())
                .send()
                .await?;

            match resp.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    #[derive(Deserialize)]
                    struct Inserted {
                        id: Option<String>,
                    }
                    let body: Inserted = resp.json().await?;
                    return body
                        .id
                        .filter(|id| !id.is_empty())
                        .map(PublishedId)
                        .ok_or(PublishError::MissingVideoId);
                }
                StatusCode::PERMANENT_REDIRECT => {
                    let range = resp.headers().get(header::RANGE).and_then(|v| v.to_str().ok());
                    let next = resume_offset(range)
                        .filter(|n| *n <= end)
                        .ok_or_else(|| {
                            PublishError::Other(format!("unusable Range header {range:?}"))
                        })?;
                    if filled == 0 {
                        return Err(PublishError::Other(
                            "server wants more bytes than the file has".into(),
                        ));
                    }
                    if next <= offset {
                        stalled += 1;
                        if stalled >= MAX_STALLED_CHUNKS {
                            return Err(PublishError::Other(format!(
                                "upload stalled at byte {next} of {total}"
                            )));
                        }
                    } else {
                        stalled = 0;
                    }
                    if next != end {
                        debug!(
                            target: "dispatch",
                            identity = identity.id,
                            sent = end,
                            stored = next,
                            "resuming from server offset"
                        );
                        file.seek(SeekFrom::Start(next)).await.map_err(io)?;
                    }
                    offset = next;
                    debug!(
                        target: "dispatch",
                        identity = identity.id,
                        progress = (offset * 100).checked_div(total).unwrap_or(100),
                        "upload progress"
                    );
                }
                _ => return Err(api_error(resp).await),
            }
        }
    }
}
