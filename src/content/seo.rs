// src/content/seo.rs
//! Title, description and tags. The LLM may propose a title; everything
//! else is template-driven so a failed completion never blocks a publish.

use tracing::{debug, warn};

use super::{Script, VideoFormat};
use crate::llm::DynTextGenerator;
use crate::opportunity::Opportunity;
use crate::publish::VideoMetadata;

/// Platform limit on titles, in characters.
pub const MAX_TITLE_CHARS: usize = 100;
const MAX_TAGS: usize = 15;

/// Cut to `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().chain(c.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic title for a format and opportunity, at most 100 characters.
pub fn fallback_title(format: VideoFormat, o: &Opportunity) -> String {
    let topic = o.label.trim();
    let title = match format {
        VideoFormat::Tutorial => {
            let lower = topic.to_lowercase();
            if topic.contains('|') || topic.contains('(') {
                topic.to_string()
            } else if lower.contains("chatgpt") || lower.split_whitespace().any(|w| w == "ai" || w.starts_with("ai-")) {
                if lower.contains("budget") {
                    "ChatGPT for Budgeting: Save $500/Month (Tutorial)".to_string()
                } else if lower.contains("invest") {
                    "AI Investment Guide: ChatGPT for Smart Investing".to_string()
                } else {
                    format!("{} (Step-by-Step Tutorial)", title_case(topic))
                }
            } else {
                format!("{} (Complete Guide)", title_case(topic))
            }
        }
        VideoFormat::Shorts => match &o.emotion {
            Some(e) => format!("Bible Verses for {e} in Face of {topic} | 60s Short"),
            None => format!("Bible Verses for {topic} | 60s Short"),
        },
        VideoFormat::Meditation => match &o.emotion {
            Some(e) => format!("Scripture Meditation for {e} | {topic} | Peaceful Bible Verses"),
            None => format!("Scripture Meditation | {topic} | Peaceful Bible Verses"),
        },
    };
    truncate_chars(&title, MAX_TITLE_CHARS)
}

fn hashtag(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

pub fn description(format: VideoFormat, o: &Opportunity, script: &Script) -> String {
    let topic = o.label.trim();
    match format {
        VideoFormat::Tutorial => {
            let mut prompts = String::new();
            if !script.prompts.is_empty() {
                prompts.push_str("\n\nCHATGPT PROMPTS (copy-paste ready):\n");
                for (i, p) in script.prompts.iter().enumerate() {
                    let one_line = p.split_whitespace().collect::<Vec<_>>().join(" ");
                    prompts.push_str(&format!("\nPrompt #{}:\n{}\n", i + 1, one_line));
                }
            }
            format!(
                "Learn {} with this complete reference guide!\n\n\
                 This video gives you exact ChatGPT prompts you can copy and use today.{prompts}\n\n\
                 WHAT YOU'LL LEARN:\n- Exact prompts\n- Step-by-step implementation\n- Common mistakes to avoid\n\n\
                 #PersonalFinance #ChatGPT #AITools #Budgeting #SaveMoney\n\n\
                 DISCLAIMER: Educational purposes only. Not financial advice.",
                topic.to_lowercase()
            )
        }
        VideoFormat::Shorts | VideoFormat::Meditation => {
            let emotion = o.emotion.as_deref().unwrap_or("peace");
            let verses = script
                .verses
                .iter()
                .map(|v| format!("- {v}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "Find peace through scripture for {topic}.\n\n\
                 {} Bible verses addressing {emotion} in the context of {topic}:\n{verses}\n\n\
                 Subscribe for daily scripture.\n\n\
                 #BibleVerses #{} #{} #Faith{}",
                script.verses.len(),
                hashtag(emotion),
                hashtag(topic),
                if format == VideoFormat::Shorts { " #Shorts" } else { " #Meditation" }
            )
        }
    }
}

pub fn tags(format: VideoFormat, o: &Opportunity) -> Vec<String> {
    let topic = o.label.to_lowercase();
    let mut tags: Vec<String> = match format {
        VideoFormat::Tutorial => {
            let mut t: Vec<String> = [
                "personal finance",
                "ai tools",
                "chatgpt",
                "chatgpt tutorial",
                "budgeting",
                "finance tips",
                "money management",
                "ai budgeting",
                "financial planning",
                "smart money",
                "save money",
                "chatgpt prompts",
                "ai personal finance",
                "budget tutorial",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            if topic.contains("invest") {
                t.extend(["investing", "investment tips", "ai investing"].map(String::from));
            }
            if topic.contains("save") || topic.contains("saving") {
                t.extend(["saving money", "money saving tips"].map(String::from));
            }
            t
        }
        VideoFormat::Shorts | VideoFormat::Meditation => {
            let mut t = vec!["bible verses".to_string()];
            if let Some(e) = &o.emotion {
                t.push(format!("bible verses for {}", e.to_lowercase()));
                t.push(e.to_lowercase());
            }
            t.push(topic.clone());
            if format == VideoFormat::Shorts {
                t.extend(["shorts", "youtube shorts", "christian shorts", "bible shorts"].map(String::from));
            } else {
                t.extend(["scripture meditation", "sleep", "peaceful"].map(String::from));
            }
            t.extend(["faith", "prayer"].map(String::from));
            t
        }
    };
    let mut seen = std::collections::HashSet::new();
    tags.retain(|t| seen.insert(t.clone()));
    tags.truncate(MAX_TAGS);
    tags
}

pub struct SeoGenerator {
    llm: Option<DynTextGenerator>,
}

impl SeoGenerator {
    pub fn new(llm: Option<DynTextGenerator>) -> Self {
        Self { llm }
    }

    async fn llm_title(&self, format: VideoFormat, o: &Opportunity) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let prompt = format!(
            "Write one click-worthy YouTube title (max 90 characters, no quotes, no emojis) \
             for a {} video about: {}{}. Output only the title.",
            format,
            o.label,
            o.emotion.as_deref().map(|e| format!(" ({e})")).unwrap_or_default()
        );
        match llm.generate(&prompt, 60, 0.8).await {
            Ok(t) => {
                let line = t.lines().next().unwrap_or("").trim().trim_matches('"').trim();
                (!line.is_empty()).then(|| truncate_chars(line, MAX_TITLE_CHARS))
            }
            Err(e) => {
                warn!(target: "pipeline", error = %e, "llm title failed; using template");
                None
            }
        }
    }

    pub async fn metadata(
        &self,
        format: VideoFormat,
        o: &Opportunity,
        script: &Script,
    ) -> VideoMetadata {
        let title = match self.llm_title(format, o).await {
            Some(t) => t,
            None => fallback_title(format, o),
        };
        debug!(target: "pipeline", %title, "seo metadata");
        let mut m = VideoMetadata::new(title);
        m.description = description(format, o, script);
        m.tags = tags(format, o);
        m.category_id = match format {
            VideoFormat::Tutorial => "26".to_string(),
            // People & Blogs
            _ => "22".to_string(),
        };
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGenerator;
    use std::sync::Arc;

    fn script(format: VideoFormat) -> Script {
        Script {
            format,
            topic: "t".into(),
            raw: String::new(),
            narration: String::new(),
            word_count: 0,
            estimated_secs: 0.0,
            visual_cues: Vec::new(),
            prompts: vec!["Act as a budget coach and\n  review my spending.".into()],
            verses: vec!["\"Be still.\" - Psalm 46:10".into()],
        }
    }

    #[test]
    fn titles_never_exceed_the_limit() {
        let long = Opportunity::new("x".repeat(300));
        for f in [VideoFormat::Shorts, VideoFormat::Tutorial, VideoFormat::Meditation] {
            assert!(fallback_title(f, &long).chars().count() <= MAX_TITLE_CHARS);
        }
        let multibyte = Opportunity::new("é".repeat(150));
        assert_eq!(fallback_title(VideoFormat::Tutorial, &multibyte).chars().count(), 100);
    }

    #[test]
    fn tutorial_titles_follow_topic_keywords() {
        let t = |l: &str| fallback_title(VideoFormat::Tutorial, &Opportunity::new(l));
        assert_eq!(t("ChatGPT for budgeting tutorial"), "ChatGPT for Budgeting: Save $500/Month (Tutorial)");
        assert_eq!(t("AI-powered investment research"), "AI Investment Guide: ChatGPT for Smart Investing");
        assert_eq!(t("emergency fund basics"), "Emergency Fund Basics (Complete Guide)");
    }

    #[test]
    fn shorts_metadata_mentions_pair() {
        let o = Opportunity::new("AI Joblessness").with_emotion("Anxiety");
        assert_eq!(
            fallback_title(VideoFormat::Shorts, &o),
            "Bible Verses for Anxiety in Face of AI Joblessness | 60s Short"
        );
        let d = description(VideoFormat::Shorts, &o, &script(VideoFormat::Shorts));
        assert!(d.contains("#AIJoblessness"));
        assert!(d.contains("Psalm 46:10"));
        let tg = tags(VideoFormat::Shorts, &o);
        assert!(tg.contains(&"bible verses for anxiety".to_string()));
        assert!(tg.len() <= 15);
    }

    #[test]
    fn tutorial_description_lists_prompts_on_one_line() {
        let d = description(VideoFormat::Tutorial, &Opportunity::new("Budgeting"), &script(VideoFormat::Tutorial));
        assert!(d.contains("Prompt #1:\nAct as a budget coach and review my spending."));
    }

    #[tokio::test]
    async fn llm_title_is_used_and_trimmed() {
        let seo = SeoGenerator::new(Some(Arc::new(MockGenerator::new("\"Stop Overspending Today\"\nextra"))));
        let o = Opportunity::new("Budgeting");
        let m = seo.metadata(VideoFormat::Tutorial, &o, &script(VideoFormat::Tutorial)).await;
        assert_eq!(m.title, "Stop Overspending Today");
        assert_eq!(m.category_id, "26");
    }
}
