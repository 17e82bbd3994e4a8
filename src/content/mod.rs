// src/content/mod.rs
//! Text side of production: video formats, script writing, narration
//! cleanup and SEO metadata.

pub mod clean;
pub mod seo;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use clean::{clean_for_tts, estimate_narration_secs, extract_visual_cues, VisualCue};
pub use writer::{Script, ScriptWriter};

/// Output formats the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// Square scripture short around an event+emotion pair.
    Shorts,
    /// Personal finance + AI tutorial narrated over stock footage.
    Tutorial,
    /// Long scripture meditation over nature footage.
    Meditation,
}

impl VideoFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shorts => "shorts",
            Self::Tutorial => "tutorial",
            Self::Meditation => "meditation",
        }
    }

    /// `(width, height)` of the rendered video.
    pub fn resolution(self) -> (u32, u32) {
        match self {
            Self::Shorts => (1080, 1080),
            Self::Tutorial | Self::Meditation => (1920, 1080),
        }
    }

    pub fn is_scripture(self) -> bool {
        matches!(self, Self::Shorts | Self::Meditation)
    }

    /// Hard cap on narration length, if the format has one.
    pub fn max_duration_secs(self) -> Option<f64> {
        match self {
            Self::Shorts => Some(60.0),
            _ => None,
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shorts" | "short" => Ok(Self::Shorts),
            "tutorial" | "finance" => Ok(Self::Tutorial),
            "meditation" | "sleep" => Ok(Self::Meditation),
            other => Err(format!("unknown format '{other}' (shorts|tutorial|meditation)")),
        }
    }
}
