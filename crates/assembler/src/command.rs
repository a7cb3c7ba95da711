//! ffmpeg command lines used to build and extend a timelapse video
//!
//! Everything here is pure: the functions only describe invocations, the
//! assembler runs them.

use std::ffi::OsString;
use std::path::Path;
use timelapse_common::Resolution;

/// Rate every output video is rendered at
pub const OUTPUT_FPS: u32 = 30;

/// Number of digits in a staged frame name (`000.jpg`)
pub const FRAME_NAME_DIGITS: usize = 3;

/// Largest number of frames one invocation can take
pub const MAX_FRAMES: usize = 1000;

/// Name of the staged frame at 0-based `position`
#[must_use]
pub fn frame_file_name(position: usize) -> String {
    format!("{position:0width$}.jpg", width = FRAME_NAME_DIGITS)
}

/// One ffmpeg invocation (arguments only, program is chosen by the runner)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegInvocation {
    pub args: Vec<OsString>,
}

impl FfmpegInvocation {
    fn new() -> Self {
        Self { args: Vec::new() }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Arguments as display strings (logging and assertions)
    #[must_use]
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Scale to fit inside `target` keeping aspect ratio, then letterbox
#[must_use]
pub fn fit_filter(target: Resolution) -> String {
    let Resolution { width, height } = target;
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1"
    )
}

/// Encode `frames_dir/%03d.jpg` into an H.264 video at `target`
#[must_use]
pub fn frames_to_video(
    frames_dir: &Path,
    fps: u32,
    target: Resolution,
    output: &Path,
) -> FfmpegInvocation {
    FfmpegInvocation::new()
        .args(["-y", "-threads", "0"])
        .args(["-framerate".to_string(), fps.to_string()])
        .args(["-start_number", "0"])
        .arg("-i")
        .arg(frames_dir.join(format!("%0{FRAME_NAME_DIGITS}d.jpg")))
        .args(["-c:v", "libx264"])
        .args(["-r".to_string(), OUTPUT_FPS.to_string()])
        .arg("-vf")
        .arg(fit_filter(target))
        .args(["-pix_fmt", "yuv420p"])
        .arg(output)
}

/// Re-encode an existing video at `target`, using the same encoder
/// settings as [`frames_to_video`] so the two can be stream-copied together
#[must_use]
pub fn rescale_video(input: &Path, target: Resolution, output: &Path) -> FfmpegInvocation {
    FfmpegInvocation::new()
        .args(["-y", "-threads", "0"])
        .arg("-i")
        .arg(input)
        .args(["-c:v", "libx264"])
        .args(["-r".to_string(), OUTPUT_FPS.to_string()])
        .arg("-vf")
        .arg(fit_filter(target))
        .args(["-pix_fmt", "yuv420p"])
        .arg(output)
}

/// Stream-copy the videos named in a concat list into one file
#[must_use]
pub fn concat_videos(list: &Path, output: &Path) -> FfmpegInvocation {
    FfmpegInvocation::new()
        .args(["-y", "-threads", "0"])
        // Absolute paths in the list
        .args(["-safe", "0"])
        .args(["-f", "concat"])
        .arg("-i")
        .arg(list)
        .args(["-c", "copy"])
        .arg(output)
}

/// Contents of an ffmpeg concat demuxer list
#[must_use]
pub fn concat_list(inputs: &[&Path]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

/// Arguments for `ffprobe` returning stream info as JSON
#[must_use]
pub fn probe_streams(media: &Path) -> FfmpegInvocation {
    FfmpegInvocation::new()
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(media)
}
