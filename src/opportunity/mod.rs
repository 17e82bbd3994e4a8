// src/opportunity/mod.rs
//! Candidate content opportunities: the input record, its category/tone
//! labels, and the ranking/selection pipeline built on the pure scorer.

pub mod competition;
pub mod events;
pub mod scoring;
pub mod selector;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use scoring::{OpportunityScorer, ScoreBreakdown, ScoredOpportunity, ScoringConfig, SubScore};

/// Neutral age used when a candidate does not report when it started trending.
pub const DEFAULT_FRESHNESS_DAYS: f64 = 7.0;

fn default_freshness_days() -> f64 {
    DEFAULT_FRESHNESS_DAYS
}

/// A candidate topic (or event+emotion pair) evaluated for production priority.
///
/// Signals that a source could not provide deserialize to zero; age defaults
/// to [`DEFAULT_FRESHNESS_DAYS`]. `competitor_count` stays `None` until a
/// [`competition::CompetitionEstimator`] fills it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default)]
    pub search_volume: u64,
    #[serde(default)]
    pub trend_velocity_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitor_count: Option<u64>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub engagement_count: u64,
    #[serde(default = "default_freshness_days")]
    pub freshness_days: f64,
    #[serde(default, alias = "content_type", skip_serializing_if = "Option::is_none")]
    pub tone: Option<ContentTone>,
}

impl Opportunity {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            emotion: None,
            search_volume: 0,
            trend_velocity_percent: 0.0,
            competitor_count: None,
            category: Category::default(),
            engagement_count: 0,
            freshness_days: DEFAULT_FRESHNESS_DAYS,
            tone: None,
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    pub fn with_search_volume(mut self, v: u64) -> Self {
        self.search_volume = v;
        self
    }

    pub fn with_trend_velocity(mut self, pct: f64) -> Self {
        self.trend_velocity_percent = pct;
        self
    }

    pub fn with_competitors(mut self, n: u64) -> Self {
        self.competitor_count = Some(n);
        self
    }

    pub fn with_category(mut self, c: Category) -> Self {
        self.category = c;
        self
    }

    pub fn with_engagement(mut self, n: u64) -> Self {
        self.engagement_count = n;
        self
    }

    pub fn with_freshness_days(mut self, days: f64) -> Self {
        self.freshness_days = days;
        self
    }

    pub fn with_tone(mut self, tone: ContentTone) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Stable key used by usage history: `event_emotion`, or just the label.
    pub fn usage_key(&self) -> String {
        match &self.emotion {
            Some(e) => format!("{}_{}", self.label, e),
            None => self.label.clone(),
        }
    }
}

/// Content category, used for the CPM-potential sub-score.
/// Unknown labels map to [`Category::Other`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Finance,
    Business,
    Technology,
    Health,
    Education,
    Lifestyle,
    Spirituality,
    Entertainment,
    #[default]
    Other,
}

impl Category {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "finance" => Self::Finance,
            "business" => Self::Business,
            "technology" | "tech" => Self::Technology,
            "health" => Self::Health,
            "education" => Self::Education,
            "lifestyle" => Self::Lifestyle,
            "spirituality" => Self::Spirituality,
            "entertainment" => Self::Entertainment,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finance => "finance",
            Self::Business => "business",
            Self::Technology => "technology",
            Self::Health => "health",
            Self::Education => "education",
            Self::Lifestyle => "lifestyle",
            Self::Spirituality => "spirituality",
            Self::Entertainment => "entertainment",
            Self::Other => "other",
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotional direction of a video; the balancer keeps both near 50%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTone {
    Positive,
    Negative,
}

impl ContentTone {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_is_lenient() {
        assert_eq!(Category::parse(" Finance "), Category::Finance);
        assert_eq!(Category::parse("tech"), Category::Technology);
        assert_eq!(Category::parse("crypto-memes"), Category::Other);
    }

    #[test]
    fn missing_signals_use_defaults() {
        let o: Opportunity = serde_json::from_str(r#"{"label":"Money habits"}"#).unwrap();
        assert_eq!(o.search_volume, 0);
        assert_eq!(o.engagement_count, 0);
        assert_eq!(o.competitor_count, None);
        assert_eq!(o.category, Category::Other);
        assert!((o.freshness_days - DEFAULT_FRESHNESS_DAYS).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_category_deserializes_to_other() {
        let o: Opportunity =
            serde_json::from_str(r#"{"label":"x","category":"astrology"}"#).unwrap();
        assert_eq!(o.category, Category::Other);
    }

    #[test]
    fn usage_key_joins_event_and_emotion() {
        let o = Opportunity::new("AI Joblessness").with_emotion("Anxiety");
        assert_eq!(o.usage_key(), "AI Joblessness_Anxiety");
        assert_eq!(Opportunity::new("Budgeting").usage_key(), "Budgeting");
    }
}
