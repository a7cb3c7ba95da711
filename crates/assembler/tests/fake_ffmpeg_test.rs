//! FfmpegAssembler against stand-in `ffmpeg` / `ffprobe` shell scripts
//!
//! The scripts record their arguments and create the output file, so these
//! tests check the exact invocations without a real encoder.
//!
//! Everything runs in one test: writing a script while another test thread
//! forks can make exec fail with ETXTBSY.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use timelapse_assembler::{
    frame_file_name, AssembleRequest, AssemblyError, FfmpegAssembler, PreviousVideo,
    VideoAssembler,
};
use timelapse_common::Resolution;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn invocations(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn stage(dir: &Path, count: usize) {
    for i in 0..count {
        std::fs::write(dir.join(frame_file_name(i)), b"jpeg").unwrap();
    }
}

#[tokio::test]
async fn test_fake_ffmpeg_invocations() {
    let bin = tempfile::tempdir().unwrap();
    let log = bin.path().join("ffmpeg.log");

    let ffmpeg = write_script(
        bin.path(),
        "ffmpeg",
        &format!(
            "echo \"$@\" >> '{}'\nfor last; do :; done\n: > \"$last\"",
            log.display()
        ),
    );
    let ffprobe = write_script(
        bin.path(),
        "ffprobe",
        r#"echo '{"streams":[{"codec_type":"video","width":640,"height":480}]}'"#,
    );
    let broken = write_script(bin.path(), "ffmpeg-broken", "echo 'Conversion failed!' >&2\nexit 1");

    let assembler = FfmpegAssembler::with_binaries(&ffmpeg, &ffprobe);

    // Fresh video: resolution comes from the first frame
    let frames = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    stage(frames.path(), 3);

    let video = assembler
        .assemble(AssembleRequest {
            frames_dir: frames.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            fps: 6,
            previous: None,
            resolution: None,
        })
        .await
        .unwrap();

    assert_eq!(video.resolution, Resolution::new(640, 480));
    assert_eq!(video.frame_count, 3);
    assert_eq!(video.path, out.path().join("video.mp4"));
    assert!(video.path.exists());

    let calls = invocations(&log);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("-framerate 6"));
    assert!(calls[0].contains("scale=640:480"));
    assert!(calls[0].ends_with("video.mp4"));

    // Append at a different resolution: previous video is rescaled first
    std::fs::remove_file(&log).unwrap();
    let previous = out.path().join("previous.mp4");
    std::fs::write(&previous, b"mp4").unwrap();
    let out2 = tempfile::tempdir().unwrap();

    let video = assembler
        .assemble(AssembleRequest {
            frames_dir: frames.path().to_path_buf(),
            output_dir: out2.path().to_path_buf(),
            fps: 30,
            previous: Some(PreviousVideo {
                path: previous.clone(),
                resolution: Resolution::new(640, 480),
            }),
            resolution: Some(Resolution::new(320, 240)),
        })
        .await
        .unwrap();
    assert_eq!(video.resolution, Resolution::new(320, 240));

    let calls = invocations(&log);
    assert_eq!(calls.len(), 3, "segment, rescale, concat: {calls:?}");
    assert!(calls[0].ends_with("segment.mp4"));
    assert!(calls[1].contains(&previous.display().to_string()));
    assert!(calls[1].contains("scale=320:240"));
    assert!(calls[1].ends_with("previous-resized.mp4"));
    assert!(calls[2].contains("-f concat"));
    assert!(calls[2].contains("-c copy"));

    let list = std::fs::read_to_string(out2.path().join("concat.txt")).unwrap();
    let resized = out2.path().join("previous-resized.mp4");
    let segment = out2.path().join("segment.mp4");
    assert_eq!(
        list,
        format!("file '{}'\nfile '{}'\n", resized.display(), segment.display())
    );

    // Same resolution: no rescale step
    std::fs::remove_file(&log).unwrap();
    let out3 = tempfile::tempdir().unwrap();
    assembler
        .assemble(AssembleRequest {
            frames_dir: frames.path().to_path_buf(),
            output_dir: out3.path().to_path_buf(),
            fps: 30,
            previous: Some(PreviousVideo {
                path: previous.clone(),
                resolution: Resolution::new(640, 480),
            }),
            resolution: None,
        })
        .await
        .unwrap();
    let calls = invocations(&log);
    assert_eq!(calls.len(), 2, "segment, concat: {calls:?}");
    let list = std::fs::read_to_string(out3.path().join("concat.txt")).unwrap();
    assert!(list.starts_with(&format!("file '{}'", previous.display())));

    // Probing reads the first video stream
    assert_eq!(
        assembler
            .probe_resolution(&frames.path().join("000.jpg"))
            .await
            .unwrap(),
        Resolution::new(640, 480)
    );

    // A failing encoder surfaces its stderr
    let failing = FfmpegAssembler::with_binaries(&broken, &ffprobe);
    let result = failing
        .assemble(AssembleRequest {
            frames_dir: frames.path().to_path_buf(),
            output_dir: out3.path().to_path_buf(),
            fps: 30,
            previous: None,
            resolution: Some(Resolution::new(320, 240)),
        })
        .await;
    match result {
        Err(AssemblyError::ProcessFailed { stderr, .. }) => {
            assert!(stderr.contains("Conversion failed!"));
        }
        other => panic!("expected ProcessFailed, got {other:?}"),
    }

    // Too many frames are rejected before any invocation
    std::fs::remove_file(&log).unwrap();
    let many = tempfile::tempdir().unwrap();
    stage(many.path(), 1001);
    let result = assembler
        .assemble(AssembleRequest {
            frames_dir: many.path().to_path_buf(),
            output_dir: out3.path().to_path_buf(),
            fps: 30,
            previous: None,
            resolution: None,
        })
        .await;
    assert!(matches!(
        result,
        Err(AssemblyError::TooManyFrames { count: 1001, max: 1000 })
    ));
    assert!(invocations(&log).is_empty());
}
