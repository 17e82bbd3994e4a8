// src/tts.rs
//! Narration through the `edge-tts` command line tool.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::content::VideoFormat;

/// Lines of edge-tts stderr kept for error messages.
const STDERR_TAIL: usize = 20;

static RATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]\d{1,3}%$").expect("rate regex"));

fn default_binary() -> String {
    "edge-tts".to_string()
}
fn default_voice() -> String {
    "en-US-GuyNeural".to_string()
}
fn default_scripture_voice() -> String {
    "en-US-JennyNeural".to_string()
}
fn default_rate() -> String {
    "+0%".to_string()
}
fn default_scripture_rate() -> String {
    "-40%".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output/audio")
}

/// `[tts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Tutorial narration.
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Shorts and meditation narration.
    #[serde(default = "default_scripture_voice")]
    pub scripture_voice: String,
    /// Signed percentage, e.g. "+0%" or "-40%".
    #[serde(default = "default_rate")]
    pub rate: String,
    #[serde(default = "default_scripture_rate")]
    pub scripture_rate: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            voice: default_voice(),
            scripture_voice: default_scripture_voice(),
            rate: default_rate(),
            scripture_rate: default_scripture_rate(),
            timeout_secs: default_timeout_secs(),
            output_dir: default_output_dir(),
        }
    }
}

impl TtsConfig {
    pub fn sanitize(&mut self) {
        if !RATE_RE.is_match(self.rate.trim()) {
            self.rate = default_rate();
        }
        if !RATE_RE.is_match(self.scripture_rate.trim()) {
            self.scripture_rate = default_scripture_rate();
        }
        if self.voice.trim().is_empty() {
            self.voice = default_voice();
        }
        if self.scripture_voice.trim().is_empty() {
            self.scripture_voice = default_scripture_voice();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }

    /// `(voice, rate)` for a format.
    pub fn voice_for(&self, format: VideoFormat) -> (&str, &str) {
        if format.is_scripture() {
            (&self.scripture_voice, &self.scripture_rate)
        } else {
            (&self.voice, &self.rate)
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Write narration audio for `text` to `out` and return its path.
    async fn synthesize(&self, text: &str, voice: &str, rate: &str, out: &Path) -> Result<PathBuf>;
    fn name(&self) -> &'static str;
}

pub struct EdgeTts {
    binary: String,
    timeout: Duration,
}

impl EdgeTts {
    pub fn new(cfg: &TtsConfig) -> Self {
        Self {
            binary: cfg.binary.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    /// Arguments for one invocation. The rate is passed as `--rate=..` so a
    /// leading minus is not read as a flag.
    pub fn args(text_file: &Path, voice: &str, rate: &str, out: &Path) -> Vec<String> {
        vec![
            "--voice".to_string(),
            voice.to_string(),
            format!("--rate={rate}"),
            "-f".to_string(),
            text_file.to_string_lossy().to_string(),
            "--write-media".to_string(),
            out.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTts {
    async fn synthesize(&self, text: &str, voice: &str, rate: &str, out: &Path) -> Result<PathBuf> {
        if text.trim().is_empty() {
            bail!("nothing to narrate");
        }
        let bin = which::which(&self.binary)
            .with_context(|| format!("{} not found in PATH", self.binary))?;
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut text_file = tempfile::NamedTempFile::new().context("creating narration text file")?;
        text_file.write_all(text.as_bytes())?;
        text_file.flush()?;

        let mut child = Command::new(bin)
            .args(Self::args(text_file.path(), voice, rate, out))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawning edge-tts")?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: Vec<String> = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                tail.join("\n")
            })
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(target: "pipeline", secs = self.timeout.as_secs(), "edge-tts timed out; killing");
                let _ = child.kill().await;
                bail!("edge-tts timed out after {}s", self.timeout.as_secs());
            }
        };

        let stderr = match stderr_task {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(anyhow!("edge-tts exited with {status}: {}", stderr.trim()));
        }
        if !out.exists() {
            bail!("edge-tts reported success but {} is missing", out.display());
        }

        info!(target: "pipeline", %voice, %rate, out = %out.display(), chars = text.len(), "narration written");
        Ok(out.to_path_buf())
    }

    fn name(&self) -> &'static str {
        "edge-tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_a_single_argument() {
        let args = EdgeTts::args(
            Path::new("t.txt"),
            "en-US-JennyNeural",
            "-40%",
            Path::new("o.mp3"),
        );
        assert!(args.contains(&"--rate=-40%".to_string()));
        assert_eq!(args.last().unwrap(), "o.mp3");
    }

    #[test]
    fn sanitize_and_voice_selection() {
        let mut c = TtsConfig {
            rate: "fast".into(),
            scripture_voice: " ".into(),
            ..Default::default()
        };
        c.sanitize();
        assert_eq!(c.rate, "+0%");
        assert_eq!(c.voice_for(VideoFormat::Meditation), ("en-US-JennyNeural", "-40%"));
        assert_eq!(c.voice_for(VideoFormat::Tutorial), ("en-US-GuyNeural", "+0%"));
    }

    #[cfg(unix)]
    fn fake_edge_tts(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("edge-tts");
        let script = format!(
            "#!/bin/sh\n{body}\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--write-media\" ]; then : > \"$2\"; fi\n  shift\ndone\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chatty_stderr_does_not_stall_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        // About 350KB, well past a pipe buffer.
        let line = "progress ".to_string() + &"0123456789".repeat(6);
        let bin = fake_edge_tts(
            dir.path(),
            &format!("i=0; while [ $i -lt 5000 ]; do echo '{line}' >&2; i=$((i+1)); done"),
        );
        let cfg = TtsConfig {
            binary: bin.to_string_lossy().to_string(),
            timeout_secs: 10,
            ..Default::default()
        };
        let out = dir.path().join("audio").join("n.mp3");
        let got = EdgeTts::new(&cfg)
            .synthesize("Be still and know.", "en-US-GuyNeural", "+0%", &out)
            .await
            .unwrap();
        assert_eq!(got, out);
        assert!(out.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_reports_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_edge_tts(dir.path(), "echo 'voice not found' >&2; exit 3");
        let cfg = TtsConfig {
            binary: bin.to_string_lossy().to_string(),
            timeout_secs: 10,
            ..Default::default()
        };
        let err = EdgeTts::new(&cfg)
            .synthesize("hello", "bogus", "+0%", &dir.path().join("n.mp3"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("voice not found"), "{err}");
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let tts = EdgeTts::new(&TtsConfig::default());
        assert!(tts.synthesize("  ", "v", "+0%", Path::new("x.mp3")).await.is_err());
    }
}
