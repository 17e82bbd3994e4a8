//! FFmpeg/FFprobe wrappers and the video assembler.

pub mod assemble;
pub mod command;
pub mod error;
pub mod probe;

pub use assemble::{AssembledVideo, AssemblyRequest, MediaAssembler, MediaConfig, VideoAssembler};
pub use command::{FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::probe_duration;
