// src/tracker.rs
//! SQLite record of published videos, their performance samples and the
//! positive/negative content balance.

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDateTime};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::opportunity::ContentTone;

const CURRENT_SCHEMA_VERSION: i32 = 1;
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Acceptable share band for either tone, in percent.
const BALANCE_BAND: (f64, f64) = (40.0, 60.0);

fn default_db_path() -> PathBuf {
    PathBuf::from("data/published_videos.db")
}
fn default_balance_days() -> u32 {
    30
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Window for the content balance.
    #[serde(default = "default_balance_days")]
    pub balance_days: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            balance_days: default_balance_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedVideo {
    pub video_id: String,
    pub video_url: String,
    pub title: String,
    pub topic: Option<String>,
    pub content_type: Option<ContentTone>,
    pub score: Option<u32>,
    /// Identity that published it.
    pub identity: Option<u32>,
    pub publish_date: NaiveDateTime,
    pub video_file: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoStats {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub video_id: String,
    pub stats: VideoStats,
    pub checked_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToneShare {
    pub count: u64,
    pub percent: f64,
    pub in_range: bool,
}

impl ToneShare {
    fn of(count: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / total as f64
        };
        Self {
            count,
            percent,
            in_range: total > 0 && (BALANCE_BAND.0..=BALANCE_BAND.1).contains(&percent),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceStatus {
    pub period_days: u32,
    pub total_videos: u64,
    pub positive: ToneShare,
    pub negative: ToneShare,
    /// No videos counts as balanced.
    pub is_balanced: bool,
}

impl BalanceStatus {
    /// Tone to publish next to stay inside the band.
    pub fn suggestion(&self) -> ToneSuggestion {
        if self.total_videos == 0 {
            return ToneSuggestion::Either;
        }
        let (lo, hi) = BALANCE_BAND;
        if self.positive.percent < lo || self.negative.percent > hi {
            ToneSuggestion::Positive
        } else if self.positive.percent > hi || self.negative.percent < lo {
            ToneSuggestion::Negative
        } else {
            ToneSuggestion::Either
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneSuggestion {
    Positive,
    Negative,
    Either,
}

impl ToneSuggestion {
    pub fn preferred(self) -> Option<ContentTone> {
        match self {
            Self::Positive => Some(ContentTone::Positive),
            Self::Negative => Some(ContentTone::Negative),
            Self::Either => None,
        }
    }
}

pub struct Tracker {
    conn: Connection,
}

impl Tracker {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", ())?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL,
                updated TEXT NOT NULL,
                PRIMARY KEY (version)
            )",
            (),
        )?;

        let version: i32 = match conn.query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                conn.execute(
                    "INSERT INTO schema_version (version, updated) VALUES (0, datetime('now'))",
                    [],
                )?;
                0
            }
            Err(e) => return Err(e.into()),
        };

        if version < CURRENT_SCHEMA_VERSION {
            Self::migrate_schema(conn, version)?;
        }
        Ok(())
    }

    fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
        if from_version == 0 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS videos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    video_id TEXT UNIQUE NOT NULL,
                    video_url TEXT NOT NULL,
                    title TEXT NOT NULL,
                    topic TEXT,
                    content_type TEXT,
                    score INTEGER,
                    identity INTEGER,
                    publish_date TEXT NOT NULL,
                    video_file TEXT,
                    metadata TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_videos_publish_date ON videos(publish_date);
                CREATE TABLE IF NOT EXISTS performance (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    video_id TEXT NOT NULL REFERENCES videos(video_id),
                    views INTEGER NOT NULL DEFAULT 0,
                    likes INTEGER NOT NULL DEFAULT 0,
                    comments INTEGER NOT NULL DEFAULT 0,
                    checked_at TEXT NOT NULL
                );
                INSERT INTO schema_version (version, updated) VALUES (1, datetime('now'));",
            )?;
            debug!("tracker schema migrated to v1");
        }
        Ok(())
    }

    /// Insert, or update the row with the same `video_id`.
    pub fn track_video(&self, v: &TrackedVideo) -> Result<()> {
        self.conn.execute(
            "INSERT INTO videos
             (video_id, video_url, title, topic, content_type, score, identity, publish_date, video_file, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(video_id) DO UPDATE SET
                video_url = excluded.video_url, title = excluded.title, topic = excluded.topic,
                content_type = excluded.content_type, score = excluded.score, identity = excluded.identity,
                publish_date = excluded.publish_date, video_file = excluded.video_file,
                metadata = excluded.metadata",
            params![
                v.video_id,
                v.video_url,
                v.title,
                v.topic,
                v.content_type.map(ContentTone::as_str),
                v.score,
                v.identity,
                v.publish_date.format(TS_FORMAT).to_string(),
                v.video_file,
                v.metadata.to_string(),
            ],
        )?;
        info!(video_id = %v.video_id, "video tracked");
        Ok(())
    }

    pub fn update_performance(&self, video_id: &str, stats: VideoStats, at: NaiveDateTime) -> Result<()> {
        self.conn.execute(
            "INSERT INTO performance (video_id, views, likes, comments, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                video_id,
                stats.views as i64,
                stats.likes as i64,
                stats.comments as i64,
                at.format(TS_FORMAT).to_string()
            ],
        )?;
        debug!(%video_id, views = stats.views, "performance sample stored");
        Ok(())
    }

    /// Newest first.
    pub fn all_videos(&self) -> Result<Vec<TrackedVideo>> {
        let mut stmt = self.conn.prepare(
            "SELECT video_id, video_url, title, topic, content_type, score, identity, publish_date, video_file, metadata
             FROM videos ORDER BY publish_date DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let content_type: Option<String> = row.get(4)?;
            let publish_date: String = row.get(7)?;
            let metadata: Option<String> = row.get(9)?;
            Ok(TrackedVideo {
                video_id: row.get(0)?,
                video_url: row.get(1)?,
                title: row.get(2)?,
                topic: row.get(3)?,
                content_type: content_type.as_deref().and_then(ContentTone::parse),
                score: row.get(5)?,
                identity: row.get(6)?,
                publish_date: parse_ts(&publish_date),
                video_file: row.get(8)?,
                metadata: metadata
                    .and_then(|m| serde_json::from_str(&m).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn video(&self, video_id: &str) -> Result<Option<TrackedVideo>> {
        Ok(self.all_videos()?.into_iter().find(|v| v.video_id == video_id))
    }

    /// Oldest first.
    pub fn performance_history(&self, video_id: &str) -> Result<Vec<PerformanceSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT views, likes, comments, checked_at FROM performance
             WHERE video_id = ?1 ORDER BY checked_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([video_id], |row| {
            let checked_at: String = row.get(3)?;
            Ok(PerformanceSample {
                video_id: video_id.to_string(),
                stats: VideoStats {
                    views: row.get::<_, i64>(0)?.max(0) as u64,
                    likes: row.get::<_, i64>(1)?.max(0) as u64,
                    comments: row.get::<_, i64>(2)?.max(0) as u64,
                },
                checked_at: parse_ts(&checked_at),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn balance_status(&self, days: u32) -> Result<BalanceStatus> {
        self.balance_status_at(days, Local::now().naive_local())
    }

    pub fn balance_status_at(&self, days: u32, now: NaiveDateTime) -> Result<BalanceStatus> {
        let since = (now - Duration::days(days as i64)).format(TS_FORMAT).to_string();
        let mut stmt = self.conn.prepare(
            "SELECT content_type, COUNT(*) FROM videos
             WHERE publish_date >= ?1 AND content_type IS NOT NULL
             GROUP BY content_type",
        )?;
        let rows = stmt.query_map([since], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let (mut positive, mut negative) = (0u64, 0u64);
        for r in rows {
            let (tone, count) = r?;
            match ContentTone::parse(&tone) {
                Some(ContentTone::Positive) => positive = count.max(0) as u64,
                Some(ContentTone::Negative) => negative = count.max(0) as u64,
                None => {}
            }
        }
        let total = positive + negative;
        let positive = ToneShare::of(positive, total);
        let negative = ToneShare::of(negative, total);
        let status = BalanceStatus {
            period_days: days,
            total_videos: total,
            is_balanced: total == 0 || (positive.in_range && negative.in_range),
            positive,
            negative,
        };
        debug!(
            positive = status.positive.percent,
            negative = status.negative.percent,
            days,
            "content balance"
        );
        Ok(status)
    }

    pub fn suggest_next_tone(&self, days: u32) -> Result<ToneSuggestion> {
        Ok(self.balance_status(days)?.suggestion())
    }
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap().and_hms_opt(18, 0, 0).unwrap()
    }

    fn video(id: &str, tone: Option<ContentTone>, day: u32) -> TrackedVideo {
        TrackedVideo {
            video_id: id.into(),
            video_url: format!("https://youtu.be/{id}"),
            title: format!("title {id}"),
            topic: Some("topic".into()),
            content_type: tone,
            score: Some(70),
            identity: Some(1),
            publish_date: at(day),
            video_file: None,
            metadata: serde_json::json!({"format": "shorts"}),
        }
    }

    #[test]
    fn schema_is_versioned_and_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/videos.db");
        {
            let t = Tracker::open(&path).unwrap();
            t.track_video(&video("a", None, 1)).unwrap();
        }
        let t = Tracker::open(&path).unwrap();
        let v: i32 = t
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, CURRENT_SCHEMA_VERSION);
        assert_eq!(t.all_videos().unwrap().len(), 1);
    }

    #[test]
    fn track_replaces_by_id_and_lists_newest_first() {
        let t = Tracker::in_memory().unwrap();
        t.track_video(&video("a", Some(ContentTone::Positive), 1)).unwrap();
        t.track_video(&video("b", None, 2)).unwrap();
        let mut again = video("a", Some(ContentTone::Positive), 3);
        again.title = "renamed".into();
        t.track_video(&again).unwrap();

        let all = t.all_videos().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].video_id, "a");
        assert_eq!(all[0].title, "renamed");
        assert_eq!(all[0].metadata["format"], "shorts");
        assert!(t.video("zzz").unwrap().is_none());
    }

    #[test]
    fn performance_history_is_chronological() {
        let t = Tracker::in_memory().unwrap();
        t.track_video(&video("a", None, 1)).unwrap();
        let s = |v| VideoStats { views: v, likes: 1, comments: 0 };
        t.update_performance("a", s(50), at(3)).unwrap();
        t.update_performance("a", s(10), at(2)).unwrap();
        let h = t.performance_history("a").unwrap();
        assert_eq!(h.iter().map(|p| p.stats.views).collect::<Vec<_>>(), vec![10, 50]);
    }

    #[test]
    fn balance_band_and_suggestion() {
        let t = Tracker::in_memory().unwrap();
        let now = at(20);
        let empty = t.balance_status_at(30, now).unwrap();
        assert!(empty.is_balanced);
        assert_eq!(empty.suggestion(), ToneSuggestion::Either);

        t.track_video(&video("n1", Some(ContentTone::Negative), 10)).unwrap();
        t.track_video(&video("n2", Some(ContentTone::Negative), 11)).unwrap();
        t.track_video(&video("n3", Some(ContentTone::Negative), 12)).unwrap();
        t.track_video(&video("p1", Some(ContentTone::Positive), 13)).unwrap();
        let b = t.balance_status_at(30, now).unwrap();
        assert_eq!(b.total_videos, 4);
        assert_eq!(b.positive.percent, 25.0);
        assert!(!b.is_balanced);
        assert_eq!(b.suggestion(), ToneSuggestion::Positive);

        t.track_video(&video("p2", Some(ContentTone::Positive), 14)).unwrap();
        t.track_video(&video("p3", Some(ContentTone::Positive), 15)).unwrap();
        let b = t.balance_status_at(30, now).unwrap();
        assert!(b.is_balanced);
        assert_eq!(b.suggestion(), ToneSuggestion::Either);

        // outside the window
        let b = t.balance_status_at(3, now).unwrap();
        assert_eq!(b.total_videos, 0);
    }
}
