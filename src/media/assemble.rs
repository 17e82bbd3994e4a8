// src/media/assemble.rs
//! Footage + narration → finished video.
//!
//! Every clip is cut to a fixed-length segment, normalized to the format's
//! resolution and frame rate, then the segments are joined with the concat
//! demuxer. The joined track is looped or trimmed to the narration length
//! and muxed with the narration (and optionally a quiet music bed).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::command::{FfmpegCommand, FfmpegRunner};
use super::error::{MediaError, MediaResult};
use super::probe::probe_duration;
use crate::content::VideoFormat;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
const MUSIC_EXTENSIONS: [&str; 4] = ["mp3", "m4a", "wav", "ogg"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Per ffmpeg invocation.
    pub timeout_secs: u64,
    /// Finished videos land here; scratch directories are created inside.
    pub output_dir: PathBuf,
    pub segment_secs: f64,
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
    /// Optional directory of background tracks.
    pub music_dir: Option<PathBuf>,
    pub music_volume: f32,
    pub narration_volume: f32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            timeout_secs: 600,
            output_dir: PathBuf::from("output"),
            segment_secs: 5.0,
            fps: 30,
            crf: 23,
            preset: "veryfast".into(),
            music_dir: None,
            music_volume: 0.15,
            narration_volume: 1.5,
        }
    }
}

impl MediaConfig {
    pub fn sanitize(&mut self) {
        if !self.segment_secs.is_finite() || self.segment_secs < 1.0 {
            self.segment_secs = 5.0;
        }
        if self.fps == 0 || self.fps > 120 {
            self.fps = 30;
        }
        if self.crf > 51 {
            self.crf = 23;
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = 600;
        }
        self.music_volume = if self.music_volume.is_finite() {
            self.music_volume.clamp(0.0, 1.0)
        } else {
            0.15
        };
        if !self.narration_volume.is_finite() || self.narration_volume <= 0.0 {
            self.narration_volume = 1.0;
        }
    }
}

/// One cut taken from a source clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSpec {
    pub clip: usize,
    pub start: f64,
    pub duration: f64,
}

/// Cut plan covering `narration_secs`, cycling through the clips in order.
///
/// A clip duration of `None` marks a still image, which can be held for any
/// length. Repeated uses of one video clip advance through it so the same
/// frames do not show twice in a row.
pub fn plan_segments(
    narration_secs: f64,
    clip_durations: &[Option<f64>],
    segment_secs: f64,
) -> Vec<SegmentSpec> {
    if clip_durations.is_empty() || segment_secs <= 0.0 || !narration_secs.is_finite() {
        return Vec::new();
    }
    let needed = (narration_secs.max(0.0) / segment_secs).floor() as usize + 1;
    let n = clip_durations.len();

    (0..needed)
        .map(|i| {
            let clip = i % n;
            let round = (i / n) as f64;
            match clip_durations[clip] {
                Some(len) if len > segment_secs => {
                    let slack = len - segment_secs;
                    SegmentSpec {
                        clip,
                        start: (round * segment_secs) % slack,
                        duration: segment_secs,
                    }
                }
                Some(len) if len > 0.0 => SegmentSpec {
                    clip,
                    start: 0.0,
                    duration: len,
                },
                _ => SegmentSpec {
                    clip,
                    start: 0.0,
                    duration: segment_secs,
                },
            }
        })
        .collect()
}

/// Fit inside `w`x`h` keeping aspect, pad the rest black.
pub fn scale_pad_filter(w: u32, h: u32, fps: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}"
    )
}

/// Narration over a looped music bed, loudness-normalized.
pub fn music_mix_filter(narration_volume: f32, music_volume: f32) -> String {
    format!(
        "[1:a]volume={narration_volume}[narration];\
         [2:a]volume={music_volume},aloop=loop=-1:size=2e+09[music];\
         [narration][music]amix=inputs=2:duration=first,\
         loudnorm=I=-14:LRA=11:TP=-1.5[audio]"
    )
}

/// Concat demuxer list; single quotes in paths are escaped.
pub fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

pub fn is_image(path: &Path) -> bool {
    has_extension(path, &IMAGE_EXTENSIONS)
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Pick a track from `dir` deterministically for `seed`.
pub fn pick_music(dir: &Path, seed: &str) -> Option<PathBuf> {
    let mut tracks: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_extension(p, &MUSIC_EXTENSIONS))
        .collect();
    if tracks.is_empty() {
        return None;
    }
    tracks.sort();
    let idx = seed.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    Some(tracks.swap_remove(idx % tracks.len()))
}

#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub format: VideoFormat,
    pub narration: PathBuf,
    pub footage: Vec<PathBuf>,
    pub music: Option<PathBuf>,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledVideo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub segments: usize,
}

/// Turns narration and footage into a finished video file.
#[async_trait]
pub trait MediaAssembler: Send + Sync {
    async fn assemble(&self, req: &AssemblyRequest) -> MediaResult<AssembledVideo>;
}

pub struct VideoAssembler {
    cfg: MediaConfig,
    runner: FfmpegRunner,
}

impl VideoAssembler {
    pub fn new(cfg: MediaConfig) -> Self {
        let runner = FfmpegRunner::new(cfg.ffmpeg.clone()).with_timeout(cfg.timeout_secs);
        Self { cfg, runner }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.cfg
    }

    pub async fn render(&self, req: &AssemblyRequest) -> MediaResult<AssembledVideo> {
        if !req.narration.exists() {
            return Err(MediaError::FileNotFound(req.narration.clone()));
        }
        let mut duration = probe_duration(&self.cfg.ffprobe, &req.narration).await?;
        if let Some(cap) = req.format.max_duration_secs() {
            duration = duration.min(cap);
        }

        let (clips, lengths) = self.usable_footage(&req.footage).await;
        let plan = plan_segments(duration, &lengths, self.cfg.segment_secs);
        if plan.is_empty() {
            return Err(MediaError::NoFootage);
        }

        std::fs::create_dir_all(&self.cfg.output_dir)?;
        if let Some(parent) = req.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let scratch = tempfile::Builder::new()
            .prefix("assembly-")
            .tempdir_in(&self.cfg.output_dir)?;

        let (w, h) = req.format.resolution();
        let filter = scale_pad_filter(w, h, self.cfg.fps);
        let mut segment_paths = Vec::with_capacity(plan.len());
        for (i, seg) in plan.iter().enumerate() {
            let out = scratch.path().join(format!("segment_{i:03}.mp4"));
            let src = &clips[seg.clip];
            let cmd = if lengths[seg.clip].is_none() {
                FfmpegCommand::without_input(&out)
                    .input_args(["-loop", "1"])
                    .input(src)
            } else {
                FfmpegCommand::without_input(&out).seek(seg.start).input(src)
            };
            let cmd = cmd
                .duration(seg.duration)
                .video_filter(filter.clone())
                .video_codec("libx264")
                .preset(self.cfg.preset.clone())
                .crf(self.cfg.crf)
                .output_args(["-pix_fmt", "yuv420p"])
                .no_audio();
            self.runner.run(&cmd).await?;
            segment_paths.push(out);
        }
        debug!(target: "media", segments = segment_paths.len(), "segments rendered");

        let list = scratch.path().join("concat.txt");
        std::fs::write(&list, concat_list(&segment_paths))?;
        let joined = scratch.path().join("joined.mp4");
        let concat = FfmpegCommand::without_input(&joined)
            .input_args(["-f", "concat", "-safe", "0"])
            .input(&list)
            .video_codec("copy");
        self.runner.run(&concat).await?;

        let music = req
            .music
            .clone()
            .or_else(|| {
                self.cfg
                    .music_dir
                    .as_deref()
                    .and_then(|d| pick_music(d, &req.output.to_string_lossy()))
            })
            .filter(|m| {
                let ok = m.exists();
                if !ok {
                    warn!(target: "media", path = %m.display(), "music track missing; muxing narration only");
                }
                ok
            });

        let mut mux = FfmpegCommand::without_input(&req.output)
            .input_args(["-stream_loop", "-1"])
            .input(&joined)
            .input(&req.narration);
        mux = match &music {
            Some(track) => mux
                .input(track)
                .filter_complex(music_mix_filter(self.cfg.narration_volume, self.cfg.music_volume))
                .map("0:v")
                .map("[audio]"),
            None => mux.map("0:v").map("1:a"),
        };
        let mux = mux
            .duration(duration)
            .video_codec("copy")
            .audio_codec("aac")
            .audio_bitrate("192k")
            .output_args(["-movflags", "+faststart"]);
        self.runner.run(&mux).await?;

        info!(
            target: "media",
            output = %req.output.display(),
            duration_secs = duration,
            segments = plan.len(),
            music = music.is_some(),
            "video assembled"
        );
        Ok(AssembledVideo {
            path: req.output.clone(),
            duration_secs: duration,
            segments: plan.len(),
        })
    }

    /// Existing clips with their lengths; unreadable videos are dropped.
    async fn usable_footage(&self, footage: &[PathBuf]) -> (Vec<PathBuf>, Vec<Option<f64>>) {
        let mut clips = Vec::new();
        let mut lengths = Vec::new();
        for path in footage {
            if !path.exists() {
                warn!(target: "media", path = %path.display(), "footage missing; skipping");
                continue;
            }
            if is_image(path) {
                clips.push(path.clone());
                lengths.push(None);
                continue;
            }
            match probe_duration(&self.cfg.ffprobe, path).await {
                Ok(d) if d > 0.0 => {
                    clips.push(path.clone());
                    lengths.push(Some(d));
                }
                Ok(_) => warn!(target: "media", path = %path.display(), "empty clip; skipping"),
                Err(e) => warn!(target: "media", path = %path.display(), error = %e, "probe failed; skipping"),
            }
        }
        (clips, lengths)
    }
}

#[async_trait]
impl MediaAssembler for VideoAssembler {
    async fn assemble(&self, req: &AssemblyRequest) -> MediaResult<AssembledVideo> {
        self.render(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_covers_narration_and_cycles_clips() {
        let plan = plan_segments(23.0, &[Some(30.0), Some(12.0)], 5.0);
        assert_eq!(plan.len(), 5);
        let total: f64 = plan.iter().map(|s| s.duration).sum();
        assert!(total >= 23.0);
        assert_eq!(plan.iter().map(|s| s.clip).collect::<Vec<_>>(), vec![0, 1, 0, 1, 0]);
        // second pass over clip 0 starts further in
        assert_eq!(plan[2].start, 5.0);
        assert_eq!(plan[0].start, 0.0);
    }

    #[test]
    fn short_clips_and_images() {
        let plan = plan_segments(4.0, &[Some(2.5), None], 5.0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].duration, 2.5);

        let plan = plan_segments(9.0, &[None], 5.0);
        assert!(plan.iter().all(|s| s.duration == 5.0 && s.start == 0.0));
        assert!(plan_segments(10.0, &[], 5.0).is_empty());
    }

    #[test]
    fn filters_and_lists() {
        assert_eq!(
            scale_pad_filter(1080, 1080, 30),
            "scale=1080:1080:force_original_aspect_ratio=decrease,pad=1080:1080:(ow-iw)/2:(oh-ih)/2,setsar=1,fps=30"
        );
        let mix = music_mix_filter(1.5, 0.15);
        assert!(mix.contains("volume=0.15,aloop=loop=-1"));
        assert!(mix.ends_with("[audio]"));
        let list = concat_list(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(list, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[test]
    fn music_pick_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp3", "a.mp3", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let first = pick_music(dir.path(), "seed").unwrap();
        assert_eq!(pick_music(dir.path(), "seed").unwrap(), first);
        assert_eq!(first.extension().unwrap(), "mp3");
        assert!(pick_music(&dir.path().join("none"), "seed").is_none());
    }

    #[test]
    fn sanitize_resets_bad_values() {
        let mut c = MediaConfig {
            segment_secs: 0.0,
            fps: 0,
            crf: 80,
            music_volume: 3.0,
            ..Default::default()
        };
        c.sanitize();
        assert_eq!((c.segment_secs, c.fps, c.crf), (5.0, 30, 23));
        assert_eq!(c.music_volume, 1.0);
    }

    #[tokio::test]
    async fn missing_narration_is_reported() {
        let a = VideoAssembler::new(MediaConfig::default());
        let req = AssemblyRequest {
            format: VideoFormat::Shorts,
            narration: PathBuf::from("/nonexistent/narration.mp3"),
            footage: vec![],
            music: None,
            output: PathBuf::from("/tmp/out.mp4"),
        };
        assert!(matches!(a.render(&req).await, Err(MediaError::FileNotFound(_))));
    }
}
