//! Encode command - one pipeline run per collection, in parallel

use super::StorageArgs;
use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use timelapse_assembler::FfmpegAssembler;
use timelapse_common::Resolution;
use timelapse_core::{RunOutcome, RunRequest, TimelapsePipeline};
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Args)]
pub struct EncodeCommand {
    /// Collections (cameras) to encode
    #[arg(value_name = "COLLECTION", required = true)]
    collections: Vec<String>,

    #[command(flatten)]
    storage: StorageArgs,

    /// Input frame rate, overrides `video.fps` (1-30)
    #[arg(long)]
    fps: Option<u32>,

    /// Output resolution as WIDTHxHEIGHT, overrides `video.width`/`video.height`
    #[arg(long)]
    resolution: Option<Resolution>,

    /// ffmpeg binary
    #[arg(long, env = "TIMELAPSE_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe binary
    #[arg(long, env = "TIMELAPSE_FFPROBE", default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Directory for working files (default: system temp dir)
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

impl EncodeCommand {
    fn requests(&self) -> Vec<RunRequest> {
        let mut collections = self.collections.clone();
        collections.sort();
        collections.dedup();
        collections
            .into_iter()
            .map(|collection| RunRequest {
                collection,
                fps: self.fps,
                resolution: self.resolution,
            })
            .collect()
    }

    pub async fn execute(self) -> Result<()> {
        let start = Instant::now();
        let storage = self.storage.connect().await?;
        let assembler = Arc::new(FfmpegAssembler::with_binaries(&self.ffmpeg, &self.ffprobe));

        let mut pipeline = TimelapsePipeline::new(storage, assembler);
        if let Some(dir) = &self.work_dir {
            pipeline = pipeline.with_work_root(dir);
        }

        let requests = self.requests();
        let total = requests.len();
        info!("Encoding {} collection(s)", total);

        let mut tasks = JoinSet::new();
        for request in requests {
            let pipeline = pipeline.clone();
            tasks.spawn(async move {
                let result = pipeline.run(&request).await;
                (request.collection, result)
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (collection, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Encode task panicked: {e}");
                    failed += 1;
                    continue;
                }
            };

            match result {
                Ok(RunOutcome::Published {
                    frames,
                    checkpoint,
                    resolution,
                }) => info!(
                    "✓ {collection}: added {frames} frame(s) up to {checkpoint} at {resolution}"
                ),
                Ok(RunOutcome::NoNewFrames { checkpoint }) => {
                    info!("✓ {collection}: up to date at {checkpoint}");
                }
                Err(e) => {
                    error!("✗ {collection}: {e}");
                    failed += 1;
                }
            }
        }

        info!(
            "Finished {} collection(s) in {:.2}s",
            total,
            start.elapsed().as_secs_f64()
        );

        if failed > 0 {
            bail!("{failed} of {total} collection(s) failed");
        }
        Ok(())
    }
}
