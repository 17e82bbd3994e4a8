// src/opportunity/scoring.rs
//! Opportunity scoring: seven independent step functions summed into 0..=100.
//!
//! | sub-score        | cap | direction                         |
//! |------------------|-----|-----------------------------------|
//! | search_volume    | 30  | more volume -> more points        |
//! | trend_velocity   | 20  | faster growth -> more points      |
//! | competition      | 15  | fewer rivals -> more points       |
//! | category_value   | 10  | fixed lookup, default tier 5      |
//! | seasonality      | 10  | evergreen 10 / seasonal 5 / one-time 2 / none 0 |
//! | engagement       | 10  | more engagement -> more points    |
//! | freshness        | 5   | younger -> more points            |
//!
//! The scorer is a pure function of its input. Tier tables come from
//! configuration and are normalized on construction so a misconfigured table
//! can never break the monotonic shape or exceed a cap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::{Category, Opportunity};

pub const SEARCH_VOLUME_MAX: u32 = 30;
pub const TREND_VELOCITY_MAX: u32 = 20;
pub const COMPETITION_MAX: u32 = 15;
pub const CATEGORY_VALUE_MAX: u32 = 10;
pub const SEASONALITY_MAX: u32 = 10;
pub const ENGAGEMENT_MAX: u32 = 10;
pub const FRESHNESS_MAX: u32 = 5;

/// Competitor count assumed when nobody measured it.
pub const NEUTRAL_COMPETITOR_COUNT: u64 = 50;

/// Names of the seven sub-scores, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubScore {
    SearchVolume,
    TrendVelocity,
    Competition,
    CategoryValue,
    Seasonality,
    Engagement,
    Freshness,
}

impl SubScore {
    pub const ALL: [SubScore; 7] = [
        SubScore::SearchVolume,
        SubScore::TrendVelocity,
        SubScore::Competition,
        SubScore::CategoryValue,
        SubScore::Seasonality,
        SubScore::Engagement,
        SubScore::Freshness,
    ];

    pub fn max_points(self) -> u32 {
        match self {
            SubScore::SearchVolume => SEARCH_VOLUME_MAX,
            SubScore::TrendVelocity => TREND_VELOCITY_MAX,
            SubScore::Competition => COMPETITION_MAX,
            SubScore::CategoryValue => CATEGORY_VALUE_MAX,
            SubScore::Seasonality => SEASONALITY_MAX,
            SubScore::Engagement => ENGAGEMENT_MAX,
            SubScore::Freshness => FRESHNESS_MAX,
        }
    }
}

/// Three-way seasonality classification (plus "none") computed from the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seasonality {
    Evergreen,
    Seasonal,
    OneTime,
    None,
}

impl Seasonality {
    pub fn points(self) -> u32 {
        match self {
            Seasonality::Evergreen => 10,
            Seasonality::Seasonal => 5,
            Seasonality::OneTime => 2,
            Seasonality::None => 0,
        }
    }
}

/// The raw input that produced a component, kept for audit logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    Count(u64),
    Percent(f64),
    Days(f64),
    Category(Category),
    Seasonality(Seasonality),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    pub points: u32,
    pub max: u32,
    pub input: SignalValue,
}

/// Result of scoring one opportunity. `total` is always the exact sum of the
/// seven components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub label: String,
    pub total: u32,
    pub components: BTreeMap<SubScore, Component>,
}

impl ScoreBreakdown {
    pub fn points(&self, sub: SubScore) -> u32 {
        self.components.get(&sub).map(|c| c.points).unwrap_or(0)
    }

    pub fn seasonality(&self) -> Seasonality {
        match self.components.get(&SubScore::Seasonality).map(|c| &c.input) {
            Some(SignalValue::Seasonality(s)) => *s,
            _ => Seasonality::None,
        }
    }

    /// Short `name=points` list for log lines.
    pub fn summary(&self) -> String {
        self.components
            .iter()
            .map(|(k, c)| {
                let name = serde_json::to_value(k)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                format!("{name}={}", c.points)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An opportunity paired with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredOpportunity {
    pub opportunity: Opportunity,
    pub breakdown: ScoreBreakdown,
}

/* ----------------------------
Tier tables
---------------------------- */

/// One step of a step function: `threshold -> points`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub threshold: f64,
    pub points: u32,
}

impl Tier {
    pub const fn new(threshold: f64, points: u32) -> Self {
        Self { threshold, points }
    }
}

/// "At least" table: the highest tier whose threshold is <= value wins.
/// Nondecreasing in value; anything below the lowest tier scores 0.
#[derive(Debug, Clone, PartialEq)]
pub struct AtLeastTable {
    tiers: Vec<Tier>, // threshold descending
}

impl AtLeastTable {
    pub fn new(tiers: &[Tier], cap: u32) -> Self {
        let mut tiers: Vec<Tier> = tiers
            .iter()
            .filter(|t| !t.threshold.is_nan())
            .map(|t| Tier::new(t.threshold, t.points.min(cap)))
            .collect();
        tiers.sort_by(|a, b| b.threshold.total_cmp(&a.threshold));

        // Walk from the lowest threshold upward; a higher bar never pays less.
        let mut floor = 0;
        for t in tiers.iter_mut().rev() {
            t.points = t.points.max(floor);
            floor = t.points;
        }
        Self { tiers }
    }

    pub fn lookup(&self, value: f64) -> u32 {
        self.tiers
            .iter()
            .find(|t| value >= t.threshold)
            .map(|t| t.points)
            .unwrap_or(0)
    }
}

/// "Below" table: the first tier whose threshold is > value wins.
/// Nonincreasing in value; anything at or above the last threshold scores 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BelowTable {
    tiers: Vec<Tier>, // threshold ascending
}

impl BelowTable {
    pub fn new(tiers: &[Tier], cap: u32) -> Self {
        let mut tiers: Vec<Tier> = tiers
            .iter()
            .filter(|t| !t.threshold.is_nan())
            .map(|t| Tier::new(t.threshold, t.points.min(cap)))
            .collect();
        tiers.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));

        let mut ceiling = cap;
        for t in tiers.iter_mut() {
            t.points = t.points.min(ceiling);
            ceiling = t.points;
        }
        Self { tiers }
    }

    pub fn lookup(&self, value: f64) -> u32 {
        self.tiers
            .iter()
            .find(|t| value < t.threshold)
            .map(|t| t.points)
            .unwrap_or(0)
    }
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

fn default_search_volume_tiers() -> Vec<Tier> {
    vec![
        Tier::new(150_000.0, 30),
        Tier::new(100_000.0, 25),
        Tier::new(50_000.0, 20),
        Tier::new(10_000.0, 10),
        Tier::new(1_000.0, 5),
        Tier::new(0.0, 0),
    ]
}

fn default_trend_velocity_tiers() -> Vec<Tier> {
    vec![
        Tier::new(1500.0, 20),
        Tier::new(500.0, 15),
        Tier::new(100.0, 10),
        Tier::new(0.0, 5),
        Tier::new(-100.0, 0),
    ]
}

fn default_competition_tiers() -> Vec<Tier> {
    vec![
        Tier::new(10.0, 15),
        Tier::new(50.0, 12),
        Tier::new(200.0, 8),
        Tier::new(1000.0, 4),
    ]
}

fn default_engagement_tiers() -> Vec<Tier> {
    vec![
        Tier::new(50_000.0, 10),
        Tier::new(25_000.0, 8),
        Tier::new(10_000.0, 6),
        Tier::new(5_000.0, 4),
        Tier::new(1_000.0, 2),
        Tier::new(0.0, 0),
    ]
}

fn default_freshness_tiers() -> Vec<Tier> {
    vec![Tier::new(1.0, 5), Tier::new(7.0, 3), Tier::new(30.0, 1)]
}

fn default_evergreen_keywords() -> Vec<String> {
    ["anxiety", "stress", "fear", "peace", "joy", "love"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_seasonal_keywords() -> Vec<String> {
    ["christmas", "easter", "thanksgiving", "valentine"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_one_time_max_days() -> f64 {
    3.0
}

/// `[scoring]` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_search_volume_tiers")]
    pub search_volume: Vec<Tier>,
    #[serde(default = "default_trend_velocity_tiers")]
    pub trend_velocity: Vec<Tier>,
    /// Upper bounds (exclusive) on competitor count.
    #[serde(default = "default_competition_tiers")]
    pub competition: Vec<Tier>,
    #[serde(default = "default_engagement_tiers")]
    pub engagement: Vec<Tier>,
    /// Upper bounds (exclusive) on age in days.
    #[serde(default = "default_freshness_tiers")]
    pub freshness: Vec<Tier>,
    #[serde(default = "default_evergreen_keywords")]
    pub evergreen_keywords: Vec<String>,
    #[serde(default = "default_seasonal_keywords")]
    pub seasonal_keywords: Vec<String>,
    /// Labels matching neither keyword set count as one-time events below this age.
    #[serde(default = "default_one_time_max_days")]
    pub one_time_max_days: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            search_volume: default_search_volume_tiers(),
            trend_velocity: default_trend_velocity_tiers(),
            competition: default_competition_tiers(),
            engagement: default_engagement_tiers(),
            freshness: default_freshness_tiers(),
            evergreen_keywords: default_evergreen_keywords(),
            seasonal_keywords: default_seasonal_keywords(),
            one_time_max_days: default_one_time_max_days(),
        }
    }
}

/* ----------------------------
Scorer
---------------------------- */

/// Fixed CPM-potential lookup; unknown categories fall back to the default tier.
pub fn category_points(c: Category) -> u32 {
    match c {
        Category::Finance => 10,
        Category::Business => 9,
        Category::Technology | Category::Health => 8,
        Category::Education => 7,
        Category::Lifestyle | Category::Spirituality => 6,
        Category::Entertainment | Category::Other => 5,
    }
}

/// Pure scorer built from a normalized [`ScoringConfig`]. Cheap to clone,
/// safe to share across threads.
#[derive(Debug, Clone)]
pub struct OpportunityScorer {
    search_volume: AtLeastTable,
    trend_velocity: AtLeastTable,
    competition: BelowTable,
    engagement: AtLeastTable,
    freshness: BelowTable,
    evergreen: Vec<String>,
    seasonal: Vec<String>,
    one_time_max_days: f64,
}

impl Default for OpportunityScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl OpportunityScorer {
    pub fn new(cfg: &ScoringConfig) -> Self {
        let normalize_kw = |v: &[String]| -> Vec<String> {
            v.iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        let one_time_max_days = if cfg.one_time_max_days.is_finite() {
            cfg.one_time_max_days.max(0.0)
        } else {
            default_one_time_max_days()
        };
        Self {
            search_volume: AtLeastTable::new(&cfg.search_volume, SEARCH_VOLUME_MAX),
            trend_velocity: AtLeastTable::new(&cfg.trend_velocity, TREND_VELOCITY_MAX),
            competition: BelowTable::new(&cfg.competition, COMPETITION_MAX),
            engagement: AtLeastTable::new(&cfg.engagement, ENGAGEMENT_MAX),
            freshness: BelowTable::new(&cfg.freshness, FRESHNESS_MAX),
            evergreen: normalize_kw(&cfg.evergreen_keywords),
            seasonal: normalize_kw(&cfg.seasonal_keywords),
            one_time_max_days,
        }
    }

    /// Classify a label by keyword membership; freshness decides one-time vs none.
    pub fn classify_seasonality(&self, label: &str, freshness_days: f64) -> Seasonality {
        let l = label.to_lowercase();
        if self.evergreen.iter().any(|k| l.contains(k.as_str())) {
            Seasonality::Evergreen
        } else if self.seasonal.iter().any(|k| l.contains(k.as_str())) {
            Seasonality::Seasonal
        } else if freshness_days < self.one_time_max_days {
            Seasonality::OneTime
        } else {
            Seasonality::None
        }
    }

    pub fn score(&self, o: &Opportunity) -> ScoreBreakdown {
        let competitors = o.competitor_count.unwrap_or(NEUTRAL_COMPETITOR_COUNT);
        let seasonality = self.classify_seasonality(&o.label, o.freshness_days);

        let parts = [
            (
                SubScore::SearchVolume,
                self.search_volume.lookup(o.search_volume as f64),
                SignalValue::Count(o.search_volume),
            ),
            (
                SubScore::TrendVelocity,
                self.trend_velocity.lookup(o.trend_velocity_percent),
                SignalValue::Percent(o.trend_velocity_percent),
            ),
            (
                SubScore::Competition,
                self.competition.lookup(competitors as f64),
                SignalValue::Count(competitors),
            ),
            (
                SubScore::CategoryValue,
                category_points(o.category),
                SignalValue::Category(o.category),
            ),
            (
                SubScore::Seasonality,
                seasonality.points(),
                SignalValue::Seasonality(seasonality),
            ),
            (
                SubScore::Engagement,
                self.engagement.lookup(o.engagement_count as f64),
                SignalValue::Count(o.engagement_count),
            ),
            (
                SubScore::Freshness,
                self.freshness.lookup(o.freshness_days),
                SignalValue::Days(o.freshness_days),
            ),
        ];

        let mut components = BTreeMap::new();
        let mut total = 0;
        for (sub, points, input) in parts {
            let points = points.min(sub.max_points());
            total += points;
            components.insert(
                sub,
                Component {
                    points,
                    max: sub.max_points(),
                    input,
                },
            );
        }

        let breakdown = ScoreBreakdown {
            label: o.label.clone(),
            total,
            components,
        };
        debug!(
            target: "scoring",
            label = %o.label,
            total,
            parts = %breakdown.summary(),
            "scored opportunity"
        );
        breakdown
    }

    /// Score and sort descending by total. Ties keep input order.
    pub fn rank(&self, candidates: &[Opportunity]) -> Vec<ScoredOpportunity> {
        let mut scored: Vec<ScoredOpportunity> = candidates
            .iter()
            .map(|o| ScoredOpportunity {
                opportunity: o.clone(),
                breakdown: self.score(o),
            })
            .collect();
        scored.sort_by(|a, b| b.breakdown.total.cmp(&a.breakdown.total));
        metrics::counter!("opportunities_scored_total").increment(scored.len() as u64);
        scored
    }

    pub fn best(&self, candidates: &[Opportunity]) -> Option<ScoredOpportunity> {
        self.rank(candidates).into_iter().next()
    }
}
