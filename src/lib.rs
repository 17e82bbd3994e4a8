// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analytics;
pub mod api;
pub mod assets;
pub mod clock;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod llm;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod notify;
pub mod opportunity;
pub mod pipeline;
pub mod publish;
pub mod schedule;
pub mod tracker;
pub mod tts;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::config::AppConfig;
pub use crate::dispatch::{DispatchError, QuotaAwareDispatcher};
pub use crate::opportunity::{Opportunity, OpportunityScorer, ScoreBreakdown};
pub use crate::pipeline::{Pipeline, RunOptions};
