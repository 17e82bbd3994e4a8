// src/publish/mod.rs
//! Publishing collaborators: the upload artifact and its metadata, the
//! `PublishClient` seam the dispatcher drives, quota classification, token
//! discovery, and the YouTube Data API client.

pub mod accounts;
pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::Identity;

pub use accounts::discover_identities;
pub use youtube::YouTubeUploader;

/// The rendered video handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub video_path: PathBuf,
}

impl Artifact {
    pub fn new(video_path: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    #[default]
    Public,
    Unlisted,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default)]
    pub privacy: PrivacyStatus,
    #[serde(default)]
    pub made_for_kids: bool,
    /// Scheduled release; the platform requires `private` until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<DateTime<Utc>>,
}

fn default_category_id() -> String {
    // "Howto & Style"
    "26".to_string()
}

impl VideoMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            category_id: default_category_id(),
            privacy: PrivacyStatus::default(),
            made_for_kids: false,
            publish_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedId(pub String);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("token file {path}: {message}")]
    Credential { path: PathBuf, message: String },
    #[error("oauth refresh failed: {0}")]
    Auth(String),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("upload response carried no video id")]
    MissingVideoId,
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait PublishClient: Send + Sync {
    async fn attempt_publish(
        &self,
        identity: &Identity,
        artifact: &Artifact,
        metadata: &VideoMetadata,
    ) -> Result<PublishedId, PublishError>;
}

/// Decides whether a failed attempt means "this identity is out of quota today".
pub trait QuotaClassifier: Send + Sync {
    fn is_quota_error(&self, err: &PublishError) -> bool;
}

impl<F> QuotaClassifier for F
where
    F: Fn(&PublishError) -> bool + Send + Sync,
{
    fn is_quota_error(&self, err: &PublishError) -> bool {
        self(err)
    }
}

/// Matches platform responses naming `uploadLimitExceeded`, `quotaExceeded`,
/// or any mention of "quota". Local failures (files, timeouts, transport) are
/// never quota, whatever their text says.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQuotaClassifier;

impl QuotaClassifier for DefaultQuotaClassifier {
    fn is_quota_error(&self, err: &PublishError) -> bool {
        let msg = match err {
            PublishError::Api { message, .. } => message,
            PublishError::Auth(message) => message,
            _ => return false,
        };
        msg.contains("uploadLimitExceeded")
            || msg.contains("quotaExceeded")
            || msg.to_ascii_lowercase().contains("quota")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(message: &str) -> PublishError {
        PublishError::Api {
            status: 403,
            message: message.to_string(),
        }
    }

    #[test]
    fn default_classifier_matches_platform_reasons() {
        let c = DefaultQuotaClassifier;
        assert!(c.is_quota_error(&api(
            "The user has exceeded the number of videos they may upload. (uploadLimitExceeded)"
        )));
        assert!(c.is_quota_error(&api("reason: quotaExceeded")));
        assert!(c.is_quota_error(&api("Daily QUOTA used up")));
        assert!(!c.is_quota_error(&api("forbidden")));
        assert!(!c.is_quota_error(&PublishError::MissingVideoId));
    }

    #[test]
    fn local_failures_are_never_quota() {
        let c = DefaultQuotaClassifier;
        let io = PublishError::Io {
            path: PathBuf::from("/srv/quota_reports/output/final.mp4"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(io.to_string().contains("quota"));
        assert!(!c.is_quota_error(&io));
        assert!(!c.is_quota_error(&PublishError::Credential {
            path: PathBuf::from("config/quota_backup/credentials_1_token.json"),
            message: "unreadable".into(),
        }));
        assert!(!c.is_quota_error(&PublishError::Other("quotaExceeded in local note".into())));
        assert!(c.is_quota_error(&PublishError::Auth("quotaExceeded".into())));
    }

    #[test]
    fn closures_are_classifiers() {
        let c = |e: &PublishError| matches!(e, PublishError::Api { status: 429, .. });
        assert!(c.is_quota_error(&PublishError::Api {
            status: 429,
            message: String::new()
        }));
    }

    #[test]
    fn metadata_defaults() {
        let m: VideoMetadata = serde_json::from_str(r#"{"title":"Budget"}"#).unwrap();
        assert_eq!(m.category_id, "26");
        assert_eq!(m.privacy, PrivacyStatus::Public);
        assert!(m.publish_at.is_none());
    }
}
