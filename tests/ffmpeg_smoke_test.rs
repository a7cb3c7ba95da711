//! Smoke Test - real ffmpeg end to end
//!
//! Generates test-pattern frames with ffmpeg, runs the pipeline twice over
//! in-memory storage and checks the published video with ffprobe.
//!
//! Run: cargo test --test ffmpeg_smoke_test -- --ignored
//!
//! Requires `ffmpeg` and `ffprobe` on PATH.

use anyhow::{bail, Context, Result};
use chrono::{Duration, TimeZone, Utc};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use timelapse_assembler::{FfmpegAssembler, VideoAssembler};
use timelapse_common::{CollectionKeys, ImageId, Resolution};
use timelapse_core::{Index, IndexStore, RunOutcome, RunRequest, TimelapsePipeline};
use timelapse_storage::MemoryObjectStorage;

const COLLECTION: &str = "cam1";

/// Render `count` test-pattern JPEGs as `frame1.jpg`, `frame2.jpg`, ...
fn render_frames(dir: &Path, count: usize, size: &str) -> Result<()> {
    let status = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=size={size}:rate=1"))
        .args(["-frames:v", &count.to_string()])
        .arg(dir.join("frame%d.jpg"))
        .status()
        .context("Failed to run ffmpeg")?;
    if !status.success() {
        bail!("ffmpeg exited with {status}");
    }
    Ok(())
}

/// Upload rendered frames as consecutive images and index them
async fn upload_frames(
    storage: &MemoryObjectStorage,
    dir: &Path,
    first: i64,
    count: usize,
) -> Result<Vec<ImageId>> {
    let keys = CollectionKeys::new(COLLECTION);
    let base = Utc.with_ymd_and_hms(2016, 10, 23, 13, 0, 0).unwrap();

    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let id = ImageId::from_timestamp(base + Duration::minutes(first + n as i64));
        let data = std::fs::read(dir.join(format!("frame{}.jpg", n + 1)))?;
        storage.insert(&keys.upload(&id), data).await;
        ids.push(id);
    }

    let store = IndexStore::new(Arc::new(storage.clone()));
    let mut index = store.load(COLLECTION).await?;
    for id in &ids {
        index = index.append(id.clone());
    }
    store.save(COLLECTION, &index).await?;
    Ok(ids)
}

#[tokio::test]
#[ignore]
async fn smoke_pipeline_with_real_ffmpeg() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let work = tempfile::tempdir()?;
    let storage = MemoryObjectStorage::new();
    let assembler = Arc::new(FfmpegAssembler::default());
    let pipeline = TimelapsePipeline::new(Arc::new(storage.clone()), assembler.clone())
        .with_work_root(work.path());

    // First run: fresh video at the frames' own size
    let batch = tempfile::tempdir()?;
    render_frames(batch.path(), 4, "320x240")?;
    let first = upload_frames(&storage, batch.path(), 0, 4).await?;

    let outcome = pipeline.run(&RunRequest::new(COLLECTION).with_fps(2)).await?;
    assert_eq!(
        outcome,
        RunOutcome::Published {
            frames: 4,
            checkpoint: first[3].clone(),
            resolution: Resolution::new(320, 240),
        }
    );

    // Second run: append larger frames, scaled to the existing video
    let batch = tempfile::tempdir()?;
    render_frames(batch.path(), 3, "640x480")?;
    let second = upload_frames(&storage, batch.path(), 10, 3).await?;

    let outcome = pipeline.run(&RunRequest::new(COLLECTION).with_fps(2)).await?;
    assert_eq!(
        outcome,
        RunOutcome::Published {
            frames: 3,
            checkpoint: second[2].clone(),
            resolution: Resolution::new(320, 240),
        }
    );

    // Nothing new
    let outcome = pipeline.run(&RunRequest::new(COLLECTION)).await?;
    assert!(matches!(outcome, RunOutcome::NoNewFrames { .. }));

    let keys = CollectionKeys::new(COLLECTION);
    let video = storage
        .object(&keys.video())
        .await
        .context("video was not published")?;
    assert_eq!(video.content_type.as_deref(), Some("video/mp4"));

    let local = work.path().join("published.mp4");
    std::fs::write(&local, &video.data)?;
    assert_eq!(
        assembler.probe_resolution(&local).await?,
        Resolution::new(320, 240)
    );

    let index = Index::parse(&String::from_utf8_lossy(
        &storage.object(&keys.index()).await.context("index missing")?.data,
    ));
    assert_eq!(index.len(), 7);

    // No working directories left behind
    assert_eq!(std::fs::read_dir(work.path())?.count(), 1);
    Ok(())
}
