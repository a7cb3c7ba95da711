//! Timelapse video assembly using FFmpeg
//!
//! This module turns a directory of sequentially named frames into a video,
//! optionally appending it to an existing video:
//! - **Fresh**: `000.jpg … NNN.jpg` are encoded into a new H.264 MP4
//! - **Append**: the frames are encoded as a segment, the previous video is
//!   rescaled to the target resolution when it differs, and both are
//!   stream-copied into one file
//!
//! The target resolution is, in order of precedence: the requested one, the
//! previous video's, or the first frame's.
//!
//! # Example
//! ```no_run
//! use timelapse_assembler::{AssembleRequest, FfmpegAssembler, VideoAssembler};
//! use std::path::PathBuf;
//!
//! # async fn run() -> Result<(), timelapse_assembler::AssemblyError> {
//! let assembler = FfmpegAssembler::default();
//! let video = assembler
//!     .assemble(AssembleRequest {
//!         frames_dir: PathBuf::from("/tmp/frames"),
//!         output_dir: PathBuf::from("/tmp/out"),
//!         fps: 6,
//!         previous: None,
//!         resolution: None,
//!     })
//!     .await?;
//! println!("{} at {}", video.path.display(), video.resolution);
//! # Ok(())
//! # }
//! ```

pub mod command;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use timelapse_common::Resolution;
use tracing::{debug, info};

pub use command::{frame_file_name, FfmpegInvocation, MAX_FRAMES, OUTPUT_FPS};

/// Errors specific to video assembly
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Invalid frame rate {0}: must be between 1 and {max}", max = OUTPUT_FPS)]
    InvalidFps(u32),

    #[error("No frames found in {0}")]
    NoFrames(String),

    #[error("Too many frames: {count} (max: {max})")]
    TooManyFrames { count: usize, max: usize },

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to probe {path}: {reason}")]
    Probe { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Video produced by an earlier run, already downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousVideo {
    pub path: PathBuf,
    pub resolution: Resolution,
}

/// Input of one assembly
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    /// Directory with `000.jpg`, `001.jpg`, ...
    pub frames_dir: PathBuf,
    /// Directory the output and intermediates are written to
    pub output_dir: PathBuf,
    /// Input frames per second; output is always [`OUTPUT_FPS`]
    pub fps: u32,
    /// Video to extend, `None` for a fresh video
    pub previous: Option<PreviousVideo>,
    /// Requested output resolution
    pub resolution: Option<Resolution>,
}

/// Output of one assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledVideo {
    pub path: PathBuf,
    pub resolution: Resolution,
    pub frame_count: usize,
}

/// External video encoder
#[async_trait::async_trait]
pub trait VideoAssembler: Send + Sync {
    /// Resolution of the first video stream of an image or video file
    async fn probe_resolution(&self, media: &Path) -> Result<Resolution, AssemblyError>;

    /// Build a new video from staged frames
    async fn assemble(&self, request: AssembleRequest) -> Result<AssembledVideo, AssemblyError>;
}

/// Resolution decided without probing, `None` means "use the first frame"
#[must_use]
pub fn requested_target(
    resolution: Option<Resolution>,
    previous: Option<&PreviousVideo>,
) -> Option<Resolution> {
    resolution.or_else(|| previous.map(|p| p.resolution))
}

/// Reject frame rates the fixed-rate output cannot represent
pub fn validate_fps(fps: u32) -> Result<u32, AssemblyError> {
    if (1..=OUTPUT_FPS).contains(&fps) {
        Ok(fps)
    } else {
        Err(AssemblyError::InvalidFps(fps))
    }
}

/// Count the contiguous `000.jpg, 001.jpg, …` run in `frames_dir`
pub fn count_frames(frames_dir: &Path) -> Result<usize, AssemblyError> {
    let mut count = 0;
    while count <= MAX_FRAMES && frames_dir.join(frame_file_name(count)).is_file() {
        count += 1;
    }
    if count == 0 {
        return Err(AssemblyError::NoFrames(frames_dir.display().to_string()));
    }
    if count > MAX_FRAMES {
        return Err(AssemblyError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }
    Ok(count)
}

/// [`VideoAssembler`] backed by the `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegAssembler {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegAssembler {
    /// Use explicit binaries instead of looking them up on `PATH`
    #[must_use]
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run_ffmpeg(&self, invocation: FfmpegInvocation) -> Result<Vec<u8>, AssemblyError> {
        run_blocking(self.ffmpeg.clone(), invocation).await
    }

    async fn probe(&self, media: &Path) -> Result<Resolution, AssemblyError> {
        let stdout = run_blocking(self.ffprobe.clone(), command::probe_streams(media)).await?;
        parse_probe_output(&stdout).map_err(|reason| AssemblyError::Probe {
            path: media.display().to_string(),
            reason,
        })
    }
}

#[async_trait::async_trait]
impl VideoAssembler for FfmpegAssembler {
    async fn probe_resolution(&self, media: &Path) -> Result<Resolution, AssemblyError> {
        self.probe(media).await
    }

    async fn assemble(&self, request: AssembleRequest) -> Result<AssembledVideo, AssemblyError> {
        let fps = validate_fps(request.fps)?;
        let frame_count = count_frames(&request.frames_dir)?;

        let target = match requested_target(request.resolution, request.previous.as_ref()) {
            Some(target) => target,
            None => {
                self.probe(&request.frames_dir.join(frame_file_name(0)))
                    .await?
            }
        };

        let output = request.output_dir.join("video.mp4");

        let Some(previous) = request.previous else {
            info!(frame_count, fps, %target, "Creating video from frames");
            self.run_ffmpeg(command::frames_to_video(
                &request.frames_dir,
                fps,
                target,
                &output,
            ))
            .await?;
            return Ok(AssembledVideo {
                path: output,
                resolution: target,
                frame_count,
            });
        };

        info!(
            frame_count,
            fps,
            %target,
            previous = %previous.resolution,
            "Appending frames to existing video"
        );

        let segment = request.output_dir.join("segment.mp4");
        self.run_ffmpeg(command::frames_to_video(
            &request.frames_dir,
            fps,
            target,
            &segment,
        ))
        .await?;

        let head = if previous.resolution == target {
            previous.path.clone()
        } else {
            debug!(from = %previous.resolution, to = %target, "Rescaling previous video");
            let resized = request.output_dir.join("previous-resized.mp4");
            self.run_ffmpeg(command::rescale_video(&previous.path, target, &resized))
                .await?;
            resized
        };

        let list = request.output_dir.join("concat.txt");
        tokio::fs::write(&list, command::concat_list(&[head.as_path(), segment.as_path()])).await?;
        self.run_ffmpeg(command::concat_videos(&list, &output)).await?;

        Ok(AssembledVideo {
            path: output,
            resolution: target,
            frame_count,
        })
    }
}

/// Run a subprocess on the blocking pool; a non-zero exit is an error
async fn run_blocking(
    program: PathBuf,
    invocation: FfmpegInvocation,
) -> Result<Vec<u8>, AssemblyError> {
    let name = program.display().to_string();
    debug!("{} {}", name, invocation.args_lossy().join(" "));

    let output = tokio::task::spawn_blocking(move || {
        Command::new(&program).args(&invocation.args).output()
    })
    .await
    .map_err(|e| AssemblyError::Other(format!("{name} task failed: {e}")))?
    .map_err(|source| AssemblyError::Spawn {
        program: name.clone(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AssemblyError::ProcessFailed {
            program: name,
            status: output.status.to_string(),
            stderr: stderr_tail(&stderr),
        });
    }

    Ok(output.stdout)
}

/// ffmpeg prints its banner first; the cause is at the end
fn stderr_tail(stderr: &str) -> String {
    const MAX_LINES: usize = 20;
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    lines[lines.len().saturating_sub(MAX_LINES)..].join("\n")
}

// ────────── Internal ffprobe JSON parsing ──────────

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_probe_output(stdout: &[u8]) -> Result<Resolution, String> {
    let output: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("invalid ffprobe JSON: {e}"))?;

    let stream = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "no video stream".to_string())?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            Ok(Resolution::new(width, height))
        }
        _ => Err("video stream has no dimensions".to_string()),
    }
}
