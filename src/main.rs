//! `autopilot` command line entrypoint.
//!
//! Exit codes: 0 success, 1 failure, 2 every upload identity is out of
//! quota for today.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use video_autopilot::analytics::Analytics;
use video_autopilot::api::{create_router, AppState};
use video_autopilot::content::VideoFormat;
use video_autopilot::metrics::Metrics;
use video_autopilot::pipeline::{dispatcher_from_config, Pipeline, RunOptions};
use video_autopilot::publish::discover_identities;
use video_autopilot::tracker::Tracker;
use video_autopilot::{logging, AppConfig, DispatchError, Opportunity, OpportunityScorer};

#[derive(Parser)]
#[command(name = "autopilot", version, about = "Automated video production and quota-aware publishing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Produce one video and publish it.
    Run {
        #[arg(long, short, default_value = "shorts")]
        format: VideoFormat,
        /// Stop before uploading.
        #[arg(long)]
        dry_run: bool,
        /// JSON array of candidate opportunities. Without it, shorts and
        /// meditation runs read the `[events]` news feeds first.
        #[arg(long)]
        candidates: Option<PathBuf>,
        /// Try identities marked exhausted or errored today.
        #[arg(long)]
        force: bool,
    },
    /// Score and rank opportunities from a JSON file.
    Score {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Today's remaining upload capacity.
    Capacity,
    /// List discovered upload identities.
    Accounts,
    /// Content balance and tracked videos.
    Stats {
        /// Pull fresh view counts first.
        #[arg(long)]
        refresh: bool,
    },
    /// Serve the status API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    logging::init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<DispatchError>() {
            Some(d) if d.is_exhaustion() => {
                error!("{d}");
                ExitCode::from(2)
            }
            _ => {
                error!("{e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn dispatch(command: Command) -> Result<()> {
    let cfg = AppConfig::load()?;
    match command {
        Command::Run {
            format,
            dry_run,
            candidates,
            force,
        } => {
            let candidates = match candidates {
                Some(p) => read_candidates(&p)?,
                None => Vec::new(),
            };
            let _metrics = Metrics::init()?;
            let pipeline = Pipeline::from_config(cfg)?;
            let report = pipeline
                .run(
                    format,
                    RunOptions {
                        dry_run,
                        candidates,
                        force,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Score { file, json } => {
            let scorer = OpportunityScorer::new(&cfg.scoring);
            let ranked = scorer.rank(&read_candidates(&file)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else {
                for (i, s) in ranked.iter().enumerate() {
                    println!(
                        "{:>2}. {:>3}  {}  [{}]",
                        i + 1,
                        s.breakdown.total,
                        s.breakdown.label,
                        s.breakdown.summary()
                    );
                }
            }
        }
        Command::Capacity => {
            let report = dispatcher_from_config(&cfg)?.estimate_remaining_capacity()?;
            println!(
                "{}: {}/{} identities available ({} exhausted, {} errored), ~{}-{} uploads left",
                report.date,
                report.available,
                report.total,
                report.exhausted,
                report.errored,
                report.estimated_min_uploads,
                report.estimated_max_uploads
            );
            for (id, status) in &report.per_identity {
                println!("  account {id}: {status}");
            }
        }
        Command::Accounts => {
            let ids = discover_identities(&cfg.dispatch.token_dir)?;
            if ids.is_empty() {
                println!("no token files in {}", cfg.dispatch.token_dir.display());
            }
            for i in ids {
                println!("{:>3}  {}", i.id, i.credential.display());
            }
        }
        Command::Stats { refresh } => {
            let tracker = Tracker::open(&cfg.tracker.db_path)?;
            if refresh {
                let key = cfg.youtube.key().unwrap_or_default();
                let updated = Analytics::new(key)?
                    .refresh_all(&tracker, Local::now().naive_local())
                    .await?;
                info!(updated, "stats refreshed");
            }
            let balance = tracker.balance_status(cfg.tracker.balance_days)?;
            println!(
                "last {} days: {} videos, {:.1}% positive, {:.1}% negative, balanced: {}, next: {:?}",
                balance.period_days,
                balance.total_videos,
                balance.positive.percent,
                balance.negative.percent,
                balance.is_balanced,
                balance.suggestion()
            );
            for v in tracker.all_videos()? {
                let views = tracker
                    .performance_history(&v.video_id)?
                    .last()
                    .map(|p| p.stats.views.to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{}  {:>8} views  {}", v.publish_date.date(), views, v.title);
            }
        }
        Command::Serve { port } => {
            let metrics = Metrics::init()?;
            let state = AppState {
                dispatcher: Arc::new(dispatcher_from_config(&cfg)?),
                scorer: Arc::new(OpportunityScorer::new(&cfg.scoring)),
            };
            let router = create_router(state, Some(&metrics));
            let addr = format!("{}:{}", cfg.api.bind, port.unwrap_or(cfg.api.port));
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(%addr, "status api listening");
            axum::serve(listener, router).await?;
        }
    }
    Ok(())
}

fn read_candidates(path: &Path) -> Result<Vec<Opportunity>> {
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
