// src/pipeline.rs
//! One production run: select → script → SEO → narration → footage →
//! assembly → dispatch → tracking → notification.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::assets::{self, PexelsClient, StockFootage};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::content::seo::SeoGenerator;
use crate::content::{ScriptWriter, VideoFormat};
use crate::dispatch::{
    DispatchError, JsonFileLedgerStore, Published, PublishOptions, QuotaAwareDispatcher,
};
use crate::llm::build_generator;
use crate::media::{AssemblyRequest, MediaAssembler, VideoAssembler};
use crate::notify::{Notifier, PublishEvent};
use crate::opportunity::competition::YouTubeSearchEstimator;
use crate::opportunity::events::{EventSource, RssEventSource};
use crate::opportunity::selector::{Fallback, OpportunitySelector, Selection};
use crate::opportunity::{ContentTone, Opportunity, OpportunityScorer};
use crate::publish::{discover_identities, Artifact, PrivacyStatus, YouTubeUploader};
use crate::schedule::next_publish_slot;
use crate::tracker::{TrackedVideo, Tracker};
use crate::tts::{EdgeTts, SpeechSynthesizer};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after assembly; nothing is uploaded or tracked.
    pub dry_run: bool,
    /// Live candidates; empty means discovered events, then the format's
    /// fallback list.
    pub candidates: Vec<Opportunity>,
    /// Ignore today's exhausted/errored marks.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub format: VideoFormat,
    pub selection: Selection,
    pub title: String,
    pub video_path: PathBuf,
    pub duration_secs: f64,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<Published>,
}

/// Lowercase ASCII words joined by `-`, at most 40 characters.
pub fn slug(s: &str) -> String {
    let mut out = String::new();
    for word in s
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            if out.len() + 1 + word.len() > 40 {
                break;
            }
            out.push('-');
        }
        out.extend(word.chars().take(40).map(|c| c.to_ascii_lowercase()));
    }
    if out.is_empty() {
        out.push_str("video");
    }
    out
}

/// Dispatcher over the discovered token files and the JSON ledger.
pub fn dispatcher_from_config(cfg: &AppConfig) -> Result<QuotaAwareDispatcher> {
    let identities = discover_identities(&cfg.dispatch.token_dir)?;
    if identities.is_empty() {
        warn!(target: "dispatch", dir = %cfg.dispatch.token_dir.display(), "no token files found");
    }
    Ok(QuotaAwareDispatcher::new(
        identities,
        Arc::new(YouTubeUploader::new()?),
        Arc::new(JsonFileLedgerStore::new(cfg.dispatch.ledger_path.clone())),
    )
    .with_settings(cfg.dispatch.settings()))
}

pub struct Pipeline {
    cfg: AppConfig,
    selector: OpportunitySelector,
    events: Option<Arc<dyn EventSource>>,
    writer: ScriptWriter,
    seo: SeoGenerator,
    tts: Arc<dyn SpeechSynthesizer>,
    footage: Arc<dyn StockFootage>,
    assembler: Arc<dyn MediaAssembler>,
    dispatcher: QuotaAwareDispatcher,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Wire the production collaborators from config.
    pub fn from_config(cfg: AppConfig) -> Result<Self> {
        let scorer = OpportunityScorer::new(&cfg.scoring);
        let estimator = YouTubeSearchEstimator::new(
            cfg.youtube.key(),
            cfg.selector.competition_query_prefix.clone(),
        )?;
        let selector = OpportunitySelector::new(scorer, Arc::new(estimator), cfg.selector.clone());

        let llm = build_generator(&cfg.llm).context("building llm client")?;
        let writer = ScriptWriter::new(llm.clone(), cfg.llm.temperature);
        let seo = SeoGenerator::new(Some(llm));

        let dispatcher = dispatcher_from_config(&cfg)?;
        let events = if cfg.events.is_active() {
            let source: Arc<dyn EventSource> = Arc::new(RssEventSource::new(&cfg.events)?);
            Some(source)
        } else {
            None
        };

        Ok(Self {
            selector,
            events,
            writer,
            seo,
            tts: Arc::new(EdgeTts::new(&cfg.tts)),
            footage: Arc::new(PexelsClient::new(cfg.assets.api_key.clone())?),
            assembler: Arc::new(VideoAssembler::new(cfg.media.clone())),
            dispatcher,
            notifier: Notifier::from_config(&cfg.notify),
            clock: Arc::new(SystemClock),
            cfg,
        })
    }

    pub fn with_tts(mut self, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        self.tts = tts;
        self
    }

    pub fn with_footage(mut self, footage: Arc<dyn StockFootage>) -> Self {
        self.footage = footage;
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn MediaAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_selector(mut self, selector: OpportunitySelector) -> Self {
        self.selector = selector;
        self
    }

    /// `None` turns discovery off.
    pub fn with_events(mut self, events: Option<Arc<dyn EventSource>>) -> Self {
        self.events = events;
        self
    }

    pub fn with_writer(mut self, writer: ScriptWriter, seo: SeoGenerator) -> Self {
        self.writer = writer;
        self.seo = seo;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: QuotaAwareDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dispatcher(&self) -> &QuotaAwareDispatcher {
        &self.dispatcher
    }

    pub async fn run(&self, format: VideoFormat, opts: RunOptions) -> Result<RunReport> {
        let result = self.run_inner(format, opts).await;
        let label = match &result {
            Ok(r) if r.dry_run => "dry_run",
            Ok(_) => "published",
            Err(e)
                if e.downcast_ref::<DispatchError>()
                    .is_some_and(DispatchError::is_exhaustion) =>
            {
                "exhausted"
            }
            Err(_) => "failed",
        };
        metrics::counter!("pipeline_runs_total", "result" => label).increment(1);
        result
    }

    async fn run_inner(&self, format: VideoFormat, opts: RunOptions) -> Result<RunReport> {
        let now = self.clock.now();
        info!(
            target: "pipeline",
            %format,
            dry_run = opts.dry_run,
            candidates = opts.candidates.len(),
            "run started"
        );

        let preferred = if format.is_scripture() {
            self.preferred_tone()
        } else {
            None
        };
        let fallback = match format {
            VideoFormat::Tutorial => Fallback::RotatingTopic,
            VideoFormat::Shorts | VideoFormat::Meditation => Fallback::Curated,
        };
        let candidates = if opts.candidates.is_empty() && fallback == Fallback::Curated {
            self.discover(now).await
        } else {
            opts.candidates
        };
        let selection = self
            .selector
            .select(candidates, preferred, fallback, now)
            .await
            .context("selecting opportunity")?;
        let opportunity = &selection.opportunity;

        let script = self.writer.write(format, opportunity).await?;
        let mut metadata = self.seo.metadata(format, opportunity, &script).await;
        if self.cfg.dispatch.schedule_publish {
            let at = next_publish_slot(now, self.cfg.dispatch.publish_hour);
            metadata.publish_at = Some(at);
            metadata.privacy = PrivacyStatus::Private;
            info!(target: "pipeline", publish_at = %at, "scheduled release");
        }

        let stamp = now.format("%Y-%m-%d_%H%M%S");
        let name = format!("{stamp}_{format}_{}", slug(&opportunity.label));

        let narration_path = self.cfg.tts.output_dir.join(format!("{name}.mp3"));
        let (voice, rate) = self.cfg.tts.voice_for(format);
        let narration = self
            .tts
            .synthesize(&script.narration, voice, rate, &narration_path)
            .await
            .context("narration")?;

        let queries = assets::queries_for(&self.cfg.assets, format, opportunity);
        let footage =
            assets::gather_footage(self.footage.as_ref(), &self.cfg.assets, &queries).await;

        let request = AssemblyRequest {
            format,
            narration,
            footage,
            music: None,
            output: self.cfg.media.output_dir.join(format!("{name}.mp4")),
        };
        let video = self.assembler.assemble(&request).await.context("assembly")?;

        let mut report = RunReport {
            format,
            title: metadata.title.clone(),
            video_path: video.path.clone(),
            duration_secs: video.duration_secs,
            dry_run: opts.dry_run,
            published: None,
            selection: selection.clone(),
        };
        if opts.dry_run {
            info!(target: "pipeline", video = %video.path.display(), "dry run complete; skipping upload");
            return Ok(report);
        }

        let options = PublishOptions {
            max_attempts: None,
            force: opts.force,
        };
        let published = match self
            .dispatcher
            .publish(&Artifact::new(&video.path), &metadata, &options)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                if e.is_exhaustion() {
                    self.notifier
                        .notify(&PublishEvent::PoolExhausted {
                            title: metadata.title.clone(),
                            format: format.to_string(),
                            detail: e.to_string(),
                        })
                        .await;
                }
                return Err(e.into());
            }
        };

        let tracked = TrackedVideo {
            video_id: published.video_id.clone(),
            video_url: published.url(),
            title: metadata.title.clone(),
            topic: Some(opportunity.label.clone()),
            content_type: opportunity.tone,
            score: Some(selection.score),
            identity: Some(published.identity),
            publish_date: now.naive_local(),
            video_file: Some(video.path.to_string_lossy().to_string()),
            metadata: serde_json::json!({
                "format": format,
                "emotion": opportunity.emotion,
                "tags": metadata.tags,
                "publish_at": metadata.publish_at,
                "source": selection.source,
            }),
        };
        if let Err(e) =
            Tracker::open(&self.cfg.tracker.db_path).and_then(|t| t.track_video(&tracked))
        {
            warn!(target: "pipeline", error = %e, video_id = %published.video_id, "tracking failed");
        }

        self.notifier
            .notify(&PublishEvent::Published {
                title: metadata.title.clone(),
                url: published.url(),
                format: format.to_string(),
                identity: published.identity,
                attempts: published.attempts,
            })
            .await;

        info!(target: "pipeline", video_id = %published.video_id, identity = published.identity, "run complete");
        report.published = Some(published);
        Ok(report)
    }

    /// Trending events for the selector. A failing source is logged and
    /// yields nothing, so the run falls back.
    async fn discover(&self, now: DateTime<Local>) -> Vec<Opportunity> {
        let Some(source) = &self.events else {
            return Vec::new();
        };
        match source.fetch(now).await {
            Ok(events) => {
                info!(
                    target: "pipeline",
                    source = source.name(),
                    count = events.len(),
                    "events discovered"
                );
                events
            }
            Err(e) => {
                warn!(
                    target: "pipeline",
                    source = source.name(),
                    error = %e,
                    "event discovery failed; falling back"
                );
                Vec::new()
            }
        }
    }

    fn preferred_tone(&self) -> Option<ContentTone> {
        let days = self.cfg.tracker.balance_days;
        let now = self.clock.now().naive_local();
        let status =
            Tracker::open(&self.cfg.tracker.db_path).and_then(|t| t.balance_status_at(days, now));
        match status {
            Ok(status) => {
                let s = status.suggestion();
                info!(
                    target: "pipeline",
                    positive = status.positive.percent,
                    negative = status.negative.percent,
                    suggestion = ?s,
                    "content balance"
                );
                s.preferred()
            }
            Err(e) => {
                warn!(target: "pipeline", error = %e, "content balance unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_short_and_safe() {
        assert_eq!(slug("AI Joblessness & Anxiety!"), "ai-joblessness-anxiety");
        assert_eq!(slug("???"), "video");
        let long = slug(&"word ".repeat(30));
        assert!(long.len() <= 40);
        assert!(!long.ends_with('-'));
    }
}
