// src/content/clean.rs
//! Separating narration from production notes in LLM-written scripts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Narration speed used for duration estimates.
pub const WORDS_PER_MINUTE: f64 = 150.0;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pat).expect(stringify!($name)));
    };
}

re!(BOLD_BRACKET, r"\*\*\[.*?\]\*\*");
re!(ITALIC_BRACKET, r"\*\[.*?\]\*");
re!(BRACKET, r"\[.*?\]");
re!(STAGE_DIRECTION, r"\*[A-Z][^*]*?\.\*");
re!(CUT_FADE_END, r"(?i)\*(?:cut to|fade|end of).*?\*");
re!(RULE, r"---+|===+");
re!(BOLD, r"\*\*([^*]+)\*\*");
re!(QUOTED_PROMPT, r"(?s)\*['\u{2018}\u{2019}](.+?)['\u{2018}\u{2019}]\*");
re!(LONE_STAR_LINE, r"(?m)^\*[ \t]*$");
re!(LEADING_STAR, r"(?m)^\*[ \t]+");
re!(TRAILING_STAR, r"(?m)[ \t]+\*$");
re!(HEADER, r"(?m)^#+[ \t]+");
re!(END_OF_SCRIPT, r"End of [Ss]cript\.?");
re!(BLANK_RUN, r"\n[ \t]*\n(?:[ \t]*\n)+");
re!(VISUAL_CUE, r"(?i)\[VISUAL CUE:\s*([^\]]+)\]");

/// Strip production notes, stage directions, markdown and rules, leaving
/// only what the narrator should say.
pub fn clean_for_tts(script: &str) -> String {
    let mut s = BOLD_BRACKET.replace_all(script, "").into_owned();
    s = ITALIC_BRACKET.replace_all(&s, "").into_owned();
    s = BRACKET.replace_all(&s, "").into_owned();
    s = STAGE_DIRECTION.replace_all(&s, "").into_owned();
    s = CUT_FADE_END.replace_all(&s, "").into_owned();
    s = RULE.replace_all(&s, "").into_owned();
    s = BOLD.replace_all(&s, "$1").into_owned();
    s = QUOTED_PROMPT.replace_all(&s, "$1").into_owned();
    s = LONE_STAR_LINE.replace_all(&s, "").into_owned();
    s = LEADING_STAR.replace_all(&s, "").into_owned();
    s = TRAILING_STAR.replace_all(&s, "").into_owned();
    s = HEADER.replace_all(&s, "").into_owned();
    s = END_OF_SCRIPT.replace_all(&s, "").into_owned();
    s = BLANK_RUN.replace_all(&s, "\n\n").into_owned();
    s.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualKind {
    PresentationSlide,
    Infographic,
    Screenshot,
    Chart,
    CalculationGraphic,
    StockImage,
}

impl VisualKind {
    pub fn classify(description: &str) -> Self {
        let d = description.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| d.contains(w));
        if has(&["slide", "presentation", "prompt"]) {
            Self::PresentationSlide
        } else if has(&["graphic", "infographic"]) {
            Self::Infographic
        } else if has(&["screenshot", "interface"]) {
            Self::Screenshot
        } else if has(&["chart", "graph", "dashboard"]) {
            Self::Chart
        } else if has(&["calculation", "savings"]) {
            Self::CalculationGraphic
        } else {
            Self::StockImage
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisualCue {
    pub index: usize,
    pub description: String,
    pub kind: VisualKind,
}

/// `[VISUAL CUE: ...]` markers, in order. Used as stock-footage queries.
pub fn extract_visual_cues(script: &str) -> Vec<VisualCue> {
    VISUAL_CUE
        .captures_iter(script)
        .filter_map(|c| c.get(1))
        .enumerate()
        .map(|(index, m)| {
            let description = m.as_str().trim().to_string();
            VisualCue {
                index,
                kind: VisualKind::classify(&description),
                description,
            }
        })
        .collect()
}

const PROMPT_STARTERS: [&str; 9] = [
    "Act as", "You are", "Create", "Generate", "Analyze", "Help me", "I need", "Compare", "Identify",
];

/// Copy-paste ChatGPT prompts quoted as `*'...'*` in a tutorial script (max 5).
pub fn extract_prompts(script: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in QUOTED_PROMPT.captures_iter(script) {
        let Some(m) = c.get(1) else { continue };
        let text = m.as_str().trim();
        if text.chars().count() > 50
            && PROMPT_STARTERS.iter().any(|s| text.starts_with(s))
            && !out.iter().any(|p| p == text)
        {
            out.push(text.to_string());
        }
        if out.len() == 5 {
            break;
        }
    }
    out
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Spoken length at [`WORDS_PER_MINUTE`], in seconds.
pub fn estimate_narration_secs(text: &str) -> f64 {
    word_count(text) as f64 / WORDS_PER_MINUTE * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "# Budget Like a Pro\n\
**[HOOK]**\n\
I saved $435 last month.\n\
[VISUAL CUE: Show money savings graphic]\n\
*Cut to a calculator on a desk*\n\
---\n\
This is **really** simple.\n\
\n\
\n\
\n\
*'Act as a personal finance analyst. I will paste my last 30 days of transactions.'*\n\
*Fade out.*\n\
End of script.";

    #[test]
    fn cleaning_keeps_only_narration() {
        let out = clean_for_tts(SCRIPT);
        assert!(out.starts_with("Budget Like a Pro"));
        assert!(out.contains("I saved $435 last month."));
        assert!(out.contains("This is really simple."));
        assert!(out.contains("Act as a personal finance analyst."));
        for gone in ["[", "**", "VISUAL CUE", "Cut to", "---", "Fade", "End of script", "#"] {
            assert!(!out.contains(gone), "{gone:?} survived: {out}");
        }
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn visual_cues_are_ordered_and_classified() {
        let s = "[VISUAL CUE: Show prompt on presentation slide] text [visual cue: stressed person]";
        let cues = extract_visual_cues(s);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].kind, VisualKind::PresentationSlide);
        assert_eq!(cues[1].index, 1);
        assert_eq!(cues[1].description, "stressed person");
        assert_eq!(cues[1].kind, VisualKind::StockImage);
    }

    #[test]
    fn prompts_need_a_starter_and_length() {
        let prompts = extract_prompts(SCRIPT);
        assert_eq!(prompts.len(), 1);
        assert!(extract_prompts("*'Act as a pro.'*").is_empty());
    }

    #[test]
    fn narration_estimate_is_150_wpm() {
        let text = "word ".repeat(300);
        assert!((estimate_narration_secs(&text) - 120.0).abs() < 1e-9);
    }
}
