// src/content/writer.rs
//! Prompt building and script generation per format.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::clean::{self, VisualCue};
use super::VideoFormat;
use crate::llm::DynTextGenerator;
use crate::opportunity::Opportunity;

const TUTORIAL_MAX_TOKENS: u32 = 2500;
const SCRIPTURE_MAX_TOKENS: u32 = 800;

/// Used when the LLM is unavailable for scripture formats.
const FALLBACK_VERSES: [&str; 10] = [
    "\"Be still, and know that I am God.\" - Psalm 46:10",
    "\"The Lord is my shepherd; I shall not want.\" - Psalm 23:1",
    "\"Come to me, all who are weary, and I will give you rest.\" - Matthew 11:28",
    "\"Peace I leave with you; my peace I give you.\" - John 14:27",
    "\"The Lord bless you and keep you.\" - Numbers 6:24",
    "\"Be anxious for nothing, but in everything by prayer.\" - Philippians 4:6",
    "\"Cast all your anxiety on him because he cares for you.\" - 1 Peter 5:7",
    "\"The Lord is close to the brokenhearted.\" - Psalm 34:18",
    "\"When I am afraid, I put my trust in you.\" - Psalm 56:3",
    "\"Do not fear, for I am with you.\" - Isaiah 41:10",
];

#[derive(Debug, Clone, Serialize)]
pub struct Script {
    pub format: VideoFormat,
    pub topic: String,
    /// Text as returned by the model, production notes included.
    pub raw: String,
    /// What the narrator reads.
    pub narration: String,
    pub word_count: usize,
    pub estimated_secs: f64,
    pub visual_cues: Vec<VisualCue>,
    /// Copy-paste prompts (tutorials only), surfaced in the description.
    pub prompts: Vec<String>,
    /// Verse lines (scripture formats only).
    pub verses: Vec<String>,
}

impl Script {
    fn new(format: VideoFormat, topic: &str, raw: String, verses: Vec<String>) -> Self {
        let narration = if verses.is_empty() {
            clean::clean_for_tts(&raw)
        } else {
            verses.join("\n\n")
        };
        Self {
            format,
            topic: topic.to_string(),
            word_count: clean::word_count(&narration),
            estimated_secs: clean::estimate_narration_secs(&narration),
            visual_cues: clean::extract_visual_cues(&raw),
            prompts: clean::extract_prompts(&raw),
            narration,
            raw,
            verses,
        }
    }
}

pub fn tutorial_prompt(topic: &str) -> String {
    format!(
        r#"Write a YouTube video script for: "{topic}"

TARGET: Personal finance enthusiasts who want AI tools they can USE repeatedly.

SCRIPT STRUCTURE (1,000-1,200 words, about 7 minutes at 150 words/min):

[HOOK - First 30 seconds] Start with a specific, concrete result.
[VISUAL CUE: Show money savings graphic]

[PROBLEM - Next 60 seconds] Real numbers and frustrations.
[VISUAL CUE: Show stressed person with calculator]

[CHATGPT PROMPT #1] Read the prompt slowly inside asterisks and quotes, like
*'Act as a personal finance analyst. ...'*
[VISUAL CUE: Show prompt on presentation slide]

[WALKTHROUGH] Numbered steps the viewer can follow today.

[CHATGPT PROMPT #2 and #3] Same format as prompt #1.

[RESULTS] Realistic examples with numbers.
[VISUAL CUE: Show chart of monthly savings]

[RECAP] Three bullet recap and a call to subscribe.

Mark every scene change with [VISUAL CUE: description]. Do not add any other commentary."#
    )
}

pub fn scripture_prompt(format: VideoFormat, o: &Opportunity, count: usize) -> String {
    let theme = match &o.emotion {
        Some(e) => format!("{e} in the face of {}", o.label),
        None => o.label.clone(),
    };
    let length_hint = match format {
        VideoFormat::Shorts => "Keep each verse under 120 characters; this is a 60 second short.",
        _ => "Keep each verse under 150 characters for readability.",
    };
    format!(
        r#"You are a Bible scholar creating a peaceful meditation video.

Theme: {theme}

Generate exactly {count} Bible verses that relate to this theme.

FORMAT REQUIREMENTS:
1. Each verse on its own line
2. Format: "Verse text" - Book Chapter:Verse
3. {length_hint}
4. Choose verses that are peaceful, contemplative, and uplifting
5. Do not add explanations, commentary or numbering

Example:
"Be still, and know that I am God." - Psalm 46:10"#
    )
}

/// Keep lines shaped like `"text" - Book 1:2`.
pub fn parse_verses(response: &str) -> Vec<String> {
    response
        .lines()
        .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')').trim())
        .filter(|l| !l.is_empty() && l.contains(" - "))
        .map(str::to_string)
        .collect()
}

pub struct ScriptWriter {
    llm: DynTextGenerator,
    temperature: f32,
}

impl ScriptWriter {
    pub fn new(llm: DynTextGenerator, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    pub fn verse_count(format: VideoFormat) -> usize {
        match format {
            VideoFormat::Shorts => 2,
            _ => 10,
        }
    }

    pub async fn write(&self, format: VideoFormat, o: &Opportunity) -> Result<Script> {
        let script = match format {
            VideoFormat::Tutorial => self.tutorial(&o.label).await?,
            VideoFormat::Shorts | VideoFormat::Meditation => self.scripture(format, o).await,
        };
        info!(
            target: "pipeline",
            %format,
            topic = %script.topic,
            words = script.word_count,
            secs = script.estimated_secs,
            cues = script.visual_cues.len(),
            "script ready"
        );
        Ok(script)
    }

    async fn tutorial(&self, topic: &str) -> Result<Script> {
        let raw = self
            .llm
            .generate(&tutorial_prompt(topic), TUTORIAL_MAX_TOKENS, self.temperature)
            .await
            .with_context(|| format!("generating tutorial script for '{topic}'"))?;
        Ok(Script::new(VideoFormat::Tutorial, topic, raw, Vec::new()))
    }

    async fn scripture(&self, format: VideoFormat, o: &Opportunity) -> Script {
        let count = Self::verse_count(format);
        let prompt = scripture_prompt(format, o, count);
        let verses = match self.llm.generate(&prompt, SCRIPTURE_MAX_TOKENS, self.temperature).await {
            Ok(text) => {
                let v = parse_verses(&text);
                if v.is_empty() {
                    warn!(target: "pipeline", "llm returned no usable verses; using fallback set");
                }
                v
            }
            Err(e) => {
                warn!(target: "pipeline", error = %e, "verse generation failed; using fallback set");
                Vec::new()
            }
        };
        let verses: Vec<String> = if verses.is_empty() {
            FALLBACK_VERSES.iter().take(count).map(|s| s.to_string()).collect()
        } else {
            verses.into_iter().take(count).collect()
        };
        let raw = verses.join("\n");
        Script::new(format, &o.label, raw, verses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockGenerator, TextGenerator};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Down;

    #[async_trait]
    impl TextGenerator for Down {
        async fn generate(&self, _p: &str, _m: u32, _t: f32) -> Result<String, LlmError> {
            Err(LlmError::EmptyCompletion)
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    #[test]
    fn verse_parsing_drops_chatter_and_numbering() {
        let text = "Here are your verses:\n1. \"Be still.\" - Psalm 46:10\n\n2) \"Fear not.\" - Isaiah 41:10\nHope this helps";
        assert_eq!(
            parse_verses(text),
            vec!["\"Be still.\" - Psalm 46:10", "\"Fear not.\" - Isaiah 41:10"]
        );
    }

    #[tokio::test]
    async fn scripture_falls_back_when_llm_is_down() {
        let w = ScriptWriter::new(Arc::new(Down), 0.7);
        let o = Opportunity::new("Economic Uncertainty").with_emotion("Fear");
        let s = w.write(VideoFormat::Shorts, &o).await.unwrap();
        assert_eq!(s.verses.len(), 2);
        assert!(s.narration.contains("Psalm 46:10"));
    }

    #[tokio::test]
    async fn tutorial_failure_is_an_error() {
        let w = ScriptWriter::new(Arc::new(Down), 0.7);
        assert!(w.write(VideoFormat::Tutorial, &Opportunity::new("x")).await.is_err());
    }

    #[tokio::test]
    async fn tutorial_narration_is_cleaned() {
        let raw = "[HOOK]\nSave money fast.\n[VISUAL CUE: chart of savings]\n**Step one** is easy.";
        let w = ScriptWriter::new(Arc::new(MockGenerator::new(raw)), 0.7);
        let s = w.write(VideoFormat::Tutorial, &Opportunity::new("Budgeting")).await.unwrap();
        assert_eq!(s.narration, "Save money fast.\n\nStep one is easy.");
        assert_eq!(s.visual_cues.len(), 1);
        assert_eq!(s.word_count, 7);
    }
}
