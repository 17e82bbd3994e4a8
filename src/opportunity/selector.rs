// src/opportunity/selector.rs
//! Picks the opportunity the next video is built around.
//!
//! Order of preference:
//! 1. live candidates (competition filled in, scored, ranked), preferring the
//!    tone the content balancer asks for;
//! 2. a curated list of event+emotion pairs, rotated through usage history;
//! 3. for finance tutorials, a topic rotated by day of year.
//!
//! Every selection is appended to the usage history file.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::competition::{self, CompetitionEstimator};
use super::{Category, ContentTone, Opportunity, OpportunityScorer, ScoreBreakdown};

pub const DEFAULT_USAGE_PATH: &str = "data/opportunity_usage.json";

/// One entry of the curated fallback list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedOpportunity {
    pub event: String,
    pub emotion: String,
    #[serde(alias = "content_type")]
    pub tone: ContentTone,
    /// Pre-assigned score shown in logs and stored with the video.
    pub score: u32,
}

impl CuratedOpportunity {
    fn new(event: &str, emotion: &str, tone: ContentTone, score: u32) -> Self {
        Self {
            event: event.to_string(),
            emotion: emotion.to_string(),
            tone,
            score,
        }
    }

    pub fn usage_key(&self) -> String {
        format!("{}_{}", self.event, self.emotion)
    }

    pub fn to_opportunity(&self) -> Opportunity {
        Opportunity::new(self.event.clone())
            .with_emotion(self.emotion.clone())
            .with_category(Category::Spirituality)
            .with_tone(self.tone)
    }
}

/// Built-in curated list, used when `[selector].curated` is empty.
pub fn default_curated() -> Vec<CuratedOpportunity> {
    use ContentTone::{Negative, Positive};
    vec![
        CuratedOpportunity::new("AI Joblessness", "Anxiety", Negative, 93),
        CuratedOpportunity::new("Economic Uncertainty", "Fear", Negative, 91),
        CuratedOpportunity::new("Climate Change", "Hope", Positive, 89),
        CuratedOpportunity::new("Political Division", "Peace", Positive, 87),
        CuratedOpportunity::new("Health Crisis", "Comfort", Positive, 86),
        CuratedOpportunity::new("Social Media Anxiety", "Peace", Positive, 85),
        CuratedOpportunity::new("Financial Stress", "Trust", Positive, 84),
        CuratedOpportunity::new("Relationship Breakdown", "Hope", Positive, 83),
        CuratedOpportunity::new("Career Uncertainty", "Faith", Positive, 82),
        CuratedOpportunity::new("Mental Health Struggles", "Comfort", Positive, 81),
    ]
}

/// Personal-finance + AI topics rotated by day of year.
pub fn default_finance_topics() -> Vec<String> {
    [
        "ChatGPT for budgeting tutorial",
        "AI tools for tracking expenses",
        "ChatGPT prompts for saving money",
        "Using AI to analyze bank statements",
        "ChatGPT for debt payoff planning",
        "AI-powered investment research",
        "ChatGPT for retirement planning",
        "Automate finances with ChatGPT",
        "AI tools for credit score improvement",
        "ChatGPT for side hustle ideas",
        "Using AI to negotiate bills",
        "ChatGPT for tax optimization",
        "AI personal finance assistant setup",
        "ChatGPT prompts for wealth building",
        "AI tools for passive income ideas",
        "ChatGPT for emergency fund planning",
        "Using AI to find better insurance rates",
        "ChatGPT for college savings planning",
        "AI-powered budget forecasting",
        "ChatGPT for financial goal setting",
        "AI tools for expense categorization",
        "ChatGPT for investment portfolio review",
        "Using AI to reduce monthly bills",
        "ChatGPT prompts for frugal living",
        "AI tools for subscription management",
        "ChatGPT for meal planning on a budget",
        "Using AI to maximize credit card rewards",
        "ChatGPT for real estate investing research",
        "AI-powered net worth tracking",
        "ChatGPT for financial literacy education",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_usage_path() -> PathBuf {
    PathBuf::from(DEFAULT_USAGE_PATH)
}

fn default_query_prefix() -> String {
    "bible verses for".to_string()
}

/// `[selector]` section of the app config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_usage_path")]
    pub usage_path: PathBuf,
    #[serde(default = "default_curated")]
    pub curated: Vec<CuratedOpportunity>,
    #[serde(default = "default_finance_topics")]
    pub finance_topics: Vec<String>,
    /// Prepended to competition search queries.
    #[serde(default = "default_query_prefix")]
    pub competition_query_prefix: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            usage_path: default_usage_path(),
            curated: default_curated(),
            finance_topics: default_finance_topics(),
            competition_query_prefix: default_query_prefix(),
        }
    }
}

/* ----------------------------
Usage history
---------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
}

/// `usage key -> uses`, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageHistory(pub BTreeMap<String, Vec<UsageRecord>>);

impl UsageHistory {
    /// Missing or unreadable files start an empty history.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        let mut f = fs::File::create(&tmp).with_context(|| format!("writing {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    pub fn record(&mut self, key: &str, now: DateTime<Local>) {
        self.0.entry(key.to_string()).or_default().push(UsageRecord {
            date: now.date_naive(),
            timestamp: now.naive_local(),
        });
    }

    pub fn used_on(&self, key: &str, day: NaiveDate) -> bool {
        self.0
            .get(key)
            .is_some_and(|uses| uses.iter().any(|u| u.date == day))
    }

    pub fn last_used(&self, key: &str) -> Option<NaiveDateTime> {
        self.0.get(key)?.iter().map(|u| u.timestamp).max()
    }
}

/// Curated pick: first never-used entry, else the least recently used entry
/// not used today, else the first entry.
pub fn pick_curated<'a>(
    curated: &'a [CuratedOpportunity],
    history: &UsageHistory,
    today: NaiveDate,
) -> Option<&'a CuratedOpportunity> {
    let mut oldest: Option<(&CuratedOpportunity, NaiveDateTime)> = None;
    for c in curated {
        let key = c.usage_key();
        let Some(last) = history.last_used(&key) else {
            return Some(c);
        };
        if history.used_on(&key, today) {
            continue;
        }
        if oldest.is_none_or(|(_, t)| last < t) {
            oldest = Some((c, last));
        }
    }
    oldest.map(|(c, _)| c).or_else(|| curated.first())
}

/// Finance fallback topic for a date (index = day of year mod list length).
pub fn rotating_topic(topics: &[String], day: NaiveDate) -> Option<&str> {
    if topics.is_empty() {
        return None;
    }
    let idx = day.ordinal() as usize % topics.len();
    topics.get(idx).map(String::as_str)
}

/* ----------------------------
Selector
---------------------------- */

/// What to fall back to when no live candidate exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Curated,
    RotatingTopic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Ranked,
    Curated,
    RotatingTopic,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub opportunity: Opportunity,
    /// Score used for tracking: the computed total, or the curated score.
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    pub source: SelectionSource,
}

pub struct OpportunitySelector {
    scorer: OpportunityScorer,
    estimator: Arc<dyn CompetitionEstimator>,
    cfg: SelectorConfig,
}

impl OpportunitySelector {
    pub fn new(
        scorer: OpportunityScorer,
        estimator: Arc<dyn CompetitionEstimator>,
        cfg: SelectorConfig,
    ) -> Self {
        Self {
            scorer,
            estimator,
            cfg,
        }
    }

    pub fn scorer(&self) -> &OpportunityScorer {
        &self.scorer
    }

    /// Select and record usage. `preferred` comes from the content balancer;
    /// `None` means either tone is fine.
    pub async fn select(
        &self,
        mut candidates: Vec<Opportunity>,
        preferred: Option<ContentTone>,
        fallback: Fallback,
        now: DateTime<Local>,
    ) -> Result<Selection> {
        let selection = if candidates.is_empty() {
            self.fallback(fallback, now)?
        } else {
            competition::enrich(self.estimator.as_ref(), &mut candidates).await;
            let ranked = self.scorer.rank(&candidates);
            let matching = preferred.and_then(|tone| {
                ranked
                    .iter()
                    .find(|s| s.opportunity.tone == Some(tone))
                    .cloned()
            });
            let Some(top) = matching.or_else(|| ranked.into_iter().next()) else {
                return self.fallback(fallback, now);
            };
            Selection {
                score: top.breakdown.total,
                opportunity: top.opportunity,
                breakdown: Some(top.breakdown),
                source: SelectionSource::Ranked,
            }
        };

        let mut history = UsageHistory::load(&self.cfg.usage_path);
        history.record(&selection.opportunity.usage_key(), now);
        history.save(&self.cfg.usage_path)?;

        info!(
            target: "scoring",
            label = %selection.opportunity.label,
            emotion = selection.opportunity.emotion.as_deref().unwrap_or("-"),
            score = selection.score,
            source = ?selection.source,
            "selected opportunity"
        );
        Ok(selection)
    }

    fn fallback(&self, fallback: Fallback, now: DateTime<Local>) -> Result<Selection> {
        match fallback {
            Fallback::Curated => {
                let history = UsageHistory::load(&self.cfg.usage_path);
                let seed;
                let curated = if self.cfg.curated.is_empty() {
                    seed = default_curated();
                    &seed
                } else {
                    &self.cfg.curated
                };
                let pick = pick_curated(curated, &history, now.date_naive())
                    .context("curated opportunity list is empty")?;
                Ok(Selection {
                    opportunity: pick.to_opportunity(),
                    score: pick.score,
                    breakdown: None,
                    source: SelectionSource::Curated,
                })
            }
            Fallback::RotatingTopic => {
                let seed;
                let topics = if self.cfg.finance_topics.is_empty() {
                    seed = default_finance_topics();
                    &seed
                } else {
                    &self.cfg.finance_topics
                };
                let topic = rotating_topic(topics, now.date_naive())
                    .context("finance topic list is empty")?;
                let opportunity = Opportunity::new(topic).with_category(Category::Finance);
                let breakdown = self.scorer.score(&opportunity);
                Ok(Selection {
                    opportunity,
                    score: breakdown.total,
                    breakdown: Some(breakdown),
                    source: SelectionSource::RotatingTopic,
                })
            }
        }
    }
}
