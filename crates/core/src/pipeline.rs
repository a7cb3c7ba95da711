//! Incorporate new frames into a collection's timelapse video
//!
//! One run walks through [`PipelineState`] in order. Nothing is written to
//! the bucket before `Published`, and there the video is uploaded before
//! the checkpoint, so a run that fails at any point can simply be retried.
//!
//! The uploaded video carries the newest identifier it contains as user
//! metadata. If a run dies between the two writes, the next run notices the
//! video is ahead of the checkpoint and repairs the checkpoint first.

use crate::config::{Config, ConfigResolver, FrameLimitPolicy, DEFAULT_FPS};
use crate::error::{PipelineError, PipelineResult, PublishError, StagingError};
use crate::existence::ExistenceFilter;
use crate::index::IndexStore;
use crate::stager::{FrameStager, StagedFrames, WORK_DIR_PREFIX};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use timelapse_assembler::{
    validate_fps, AssembleRequest, AssembledVideo, PreviousVideo, VideoAssembler, MAX_FRAMES,
};
use timelapse_common::{CollectionKeys, ImageId, Resolution};
use timelapse_storage::{ObjectHead, ObjectStorage, PutOptions, StorageError};
use tracing::{debug, error, info, warn};

/// Video metadata key holding the newest identifier in the video
pub const LAST_FRAME_METADATA: &str = "last-frame-id";

/// Video metadata key holding the video resolution (`WxH`)
pub const RESOLUTION_METADATA: &str = "resolution";

/// Stages of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ConfigLoaded,
    IndexLoaded,
    FramesSelected,
    FramesStaged,
    VideoAssembled,
    Published,
    Done,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ConfigLoaded => "config-loaded",
            Self::IndexLoaded => "index-loaded",
            Self::FramesSelected => "frames-selected",
            Self::FramesStaged => "frames-staged",
            Self::VideoAssembled => "video-assembled",
            Self::Published => "published",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Parameters of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub collection: String,
    /// Overrides `video.fps`
    pub fps: Option<u32>,
    /// Overrides `video.width` / `video.height`
    pub resolution: Option<Resolution>,
}

impl RunRequest {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fps: None,
            resolution: None,
        }
    }

    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing newer than the checkpoint; nothing was written
    NoNewFrames { checkpoint: ImageId },
    /// A new video and checkpoint were published
    Published {
        frames: usize,
        checkpoint: ImageId,
        resolution: Resolution,
    },
}

/// Frame rate for a run: request, then config, then [`DEFAULT_FPS`]
#[must_use]
pub fn resolve_fps(requested: Option<u32>, configured: Option<u32>) -> u32 {
    requested.or(configured).unwrap_or(DEFAULT_FPS)
}

/// Frames one run may take; an unset or zero limit means [`MAX_FRAMES`]
#[must_use]
pub fn effective_frame_limit(configured: Option<usize>) -> usize {
    configured
        .filter(|&limit| limit > 0)
        .map_or(MAX_FRAMES, |limit| limit.min(MAX_FRAMES))
}

/// Cut an ascending frame list down to `limit` frames
#[must_use]
pub fn apply_frame_limit(
    mut frames: Vec<ImageId>,
    limit: usize,
    policy: FrameLimitPolicy,
) -> Vec<ImageId> {
    if frames.len() <= limit {
        return frames;
    }
    match policy {
        FrameLimitPolicy::Oldest => {
            frames.truncate(limit);
            frames
        }
        FrameLimitPolicy::Newest => frames.split_off(frames.len() - limit),
    }
}

/// Checkpoint to resume from, given the stored one and the video's marker.
///
/// Returns the effective checkpoint and whether the stored one is behind
/// the video.
#[must_use]
pub fn reconcile_checkpoint(
    stored: Option<ImageId>,
    video_marker: Option<ImageId>,
) -> (Option<ImageId>, bool) {
    match (stored, video_marker) {
        (Some(stored), Some(marker)) if marker > stored => (Some(marker), true),
        (stored, _) => (stored, false),
    }
}

/// Resolution recorded on the published video, if any
fn video_resolution(head: Option<&ObjectHead>) -> Option<Resolution> {
    let raw = head?.metadata.get(RESOLUTION_METADATA)?;
    match raw.parse() {
        Ok(resolution) => Some(resolution),
        Err(e) => {
            warn!(resolution = %raw, error = %e, "Ignoring malformed video resolution");
            None
        }
    }
}

fn video_marker(head: Option<&ObjectHead>) -> Option<ImageId> {
    let raw = head?.metadata.get(LAST_FRAME_METADATA)?;
    match ImageId::parse(raw) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(marker = %raw, error = %e, "Ignoring malformed video marker");
            None
        }
    }
}

/// Tracks and logs the current state of a run
struct Progress<'a> {
    collection: &'a str,
    state: PipelineState,
}

impl<'a> Progress<'a> {
    fn new(collection: &'a str) -> Self {
        Self {
            collection,
            state: PipelineState::Init,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(
            collection = self.collection,
            from = %self.state,
            to = %next,
            "Pipeline transition"
        );
        self.state = next;
    }
}

/// Working files of a run beyond the staged frames
struct WorkArea {
    frames: StagedFrames,
    scratch: TempDir,
}

impl WorkArea {
    fn cleanup(self, collection: &str) {
        if let Err(e) = self.frames.close() {
            warn!(collection, error = %e, "Failed to remove staged frames");
        }
        let scratch = self.scratch.path().display().to_string();
        if let Err(e) = self.scratch.close() {
            warn!(collection, dir = %scratch, error = %e, "Failed to remove working files");
        }
    }
}

/// Decisions made before any frame is downloaded
struct Plan {
    frames: Vec<ImageId>,
    checkpoint: Option<ImageId>,
    fps: u32,
    resolution: Option<Resolution>,
    /// Resolution of the video being extended, when recorded on it
    previous_resolution: Option<Resolution>,
    source: Option<String>,
}

/// The index-to-video pipeline for any number of collections
#[derive(Clone)]
pub struct TimelapsePipeline {
    storage: Arc<dyn ObjectStorage>,
    assembler: Arc<dyn VideoAssembler>,
    config: ConfigResolver,
    index: IndexStore,
    filter: ExistenceFilter,
    stager: FrameStager,
    work_root: Option<PathBuf>,
}

impl TimelapsePipeline {
    pub fn new(storage: Arc<dyn ObjectStorage>, assembler: Arc<dyn VideoAssembler>) -> Self {
        Self {
            config: ConfigResolver::new(storage.clone()),
            index: IndexStore::new(storage.clone()),
            filter: ExistenceFilter::new(storage.clone()),
            stager: FrameStager::new(storage.clone()),
            storage,
            assembler,
            work_root: None,
        }
    }

    /// Create working directories under `root` instead of the system temp dir
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.stager = self.stager.with_work_root(root.clone());
        self.work_root = Some(root);
        self
    }

    /// Run the pipeline once for `request.collection`
    pub async fn run(&self, request: &RunRequest) -> PipelineResult<RunOutcome> {
        let mut progress = Progress::new(&request.collection);
        let result = self.execute(request, &mut progress).await;

        match &result {
            Ok(outcome) => {
                if !progress.state.is_terminal() {
                    progress.advance(PipelineState::Done);
                }
                debug!(collection = %request.collection, ?outcome, "Pipeline finished");
            }
            Err(e) => {
                error!(
                    collection = %request.collection,
                    state = %progress.state,
                    error = %e,
                    "Pipeline failed"
                );
                progress.advance(PipelineState::Failed);
            }
        }

        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        progress: &mut Progress<'_>,
    ) -> PipelineResult<RunOutcome> {
        let collection = request.collection.as_str();

        let config = self.config.resolve(collection).await?;
        progress.advance(PipelineState::ConfigLoaded);

        let plan = match self.plan(request, &config, progress).await? {
            Ok(plan) => plan,
            Err(outcome) => return Ok(outcome),
        };

        let frames = self
            .stager
            .stage(collection, plan.frames.clone(), plan.source.as_deref())
            .await?;
        let scratch = match self.scratch_dir() {
            Ok(scratch) => scratch,
            Err(e) => {
                if let Err(close) = frames.close() {
                    warn!(collection, error = %close, "Failed to remove staged frames");
                }
                return Err(e.into());
            }
        };
        let work = WorkArea { frames, scratch };

        let result = self
            .assemble_and_publish(collection, &work, &plan, progress)
            .await;

        work.cleanup(collection);
        result
    }

    /// Select frames; `Err(outcome)` ends the run without changes
    async fn plan(
        &self,
        request: &RunRequest,
        config: &Config,
        progress: &mut Progress<'_>,
    ) -> PipelineResult<Result<Plan, RunOutcome>> {
        let collection = request.collection.as_str();
        let keys = CollectionKeys::new(collection);
        let video = config.video()?;

        let video_key = keys.video();
        let (index, stored, head) = tokio::try_join!(
            self.index.load(collection),
            self.read_checkpoint(collection),
            async { self.storage.head_object(&video_key).await.map_err(PipelineError::from) },
        )?;

        let (checkpoint, dangling) =
            reconcile_checkpoint(stored.clone(), video_marker(head.as_ref()));
        if dangling {
            if let Some(marker) = &checkpoint {
                warn!(
                    collection,
                    stored = ?stored.as_ref().map(ImageId::as_str),
                    video = %marker,
                    "Checkpoint is behind the published video, repairing"
                );
                // A failed repair is retried by the next run
                if let Err(e) = self.write_checkpoint(collection, marker).await {
                    warn!(collection, error = %e, "Failed to repair checkpoint");
                }
            }
        }
        if checkpoint.is_some() && head.is_none() {
            return Err(StorageError::NotFound(video_key).into());
        }
        progress.advance(PipelineState::IndexLoaded);

        let candidates = index.newer_than(checkpoint.as_ref());
        let existing = self
            .filter
            .filter_existing(collection, video.source.as_deref(), candidates)
            .await?;
        let available = existing.len();
        let limit = effective_frame_limit(video.frame_limit);
        let frames = apply_frame_limit(existing, limit, video.frame_limit_policy);

        if frames.len() < available {
            info!(
                collection,
                available,
                limit,
                policy = ?video.frame_limit_policy,
                "More frames pending than one run takes"
            );
        }

        if frames.is_empty() {
            return match checkpoint {
                Some(checkpoint) => {
                    info!(collection, checkpoint = %checkpoint, "No new frames");
                    progress.advance(PipelineState::Done);
                    Ok(Err(RunOutcome::NoNewFrames { checkpoint }))
                }
                None => Err(PipelineError::NoFrames(collection.to_string())),
            };
        }

        let fps = validate_fps(resolve_fps(request.fps, video.fps))?;
        progress.advance(PipelineState::FramesSelected);

        Ok(Ok(Plan {
            frames,
            checkpoint,
            fps,
            resolution: request.resolution.or_else(|| video.resolution()),
            previous_resolution: video_resolution(head.as_ref()),
            source: video.source,
        }))
    }

    async fn assemble_and_publish(
        &self,
        collection: &str,
        work: &WorkArea,
        plan: &Plan,
        progress: &mut Progress<'_>,
    ) -> PipelineResult<RunOutcome> {
        let keys = CollectionKeys::new(collection);

        let previous = if plan.checkpoint.is_some() {
            let path = work.scratch.path().join("previous.mp4");
            self.storage.download_to_path(&keys.video(), &path).await?;
            // Videos published without the metadata are probed
            let resolution = match plan.previous_resolution {
                Some(resolution) => resolution,
                None => self.assembler.probe_resolution(&path).await?,
            };
            debug!(collection, %resolution, "Fetched previous video");
            Some(PreviousVideo { path, resolution })
        } else {
            None
        };
        progress.advance(PipelineState::FramesStaged);

        let AssembledVideo {
            path,
            resolution,
            frame_count,
        } = self
            .assembler
            .assemble(AssembleRequest {
                frames_dir: work.frames.path().to_path_buf(),
                output_dir: work.scratch.path().to_path_buf(),
                fps: plan.fps,
                previous,
                resolution: plan.resolution,
            })
            .await?;
        progress.advance(PipelineState::VideoAssembled);

        let Some(newest) = work.frames.ids().last().cloned() else {
            return Err(PipelineError::NoFrames(collection.to_string()));
        };

        // Commit point: video first, then the checkpoint
        let video_key = keys.video();
        let options = PutOptions::new("video/mp4")
            .no_cache()
            .with_metadata(LAST_FRAME_METADATA, newest.as_str())
            .with_metadata(RESOLUTION_METADATA, resolution.to_string());
        self.storage
            .put_object_from_path(&video_key, &path, &options)
            .await
            .map_err(|source| PublishError::Video {
                key: video_key.clone(),
                source,
            })?;

        if let Err(e) = self.write_checkpoint(collection, &newest).await {
            error!(
                collection,
                video = %newest,
                "Video published but checkpoint write failed; next run will reconcile"
            );
            return Err(e);
        }
        progress.advance(PipelineState::Published);

        info!(
            collection,
            frames = frame_count,
            checkpoint = %newest,
            %resolution,
            "Published video"
        );

        Ok(RunOutcome::Published {
            frames: frame_count,
            checkpoint: newest,
            resolution,
        })
    }

    async fn read_checkpoint(&self, collection: &str) -> PipelineResult<Option<ImageId>> {
        let key = CollectionKeys::new(collection).checkpoint();
        let Some(data) = self.storage.get_object(&key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&data);
        if text.trim().is_empty() {
            return Ok(None);
        }
        ImageId::parse(&text)
            .map(Some)
            .map_err(|e| PipelineError::CorruptCheckpoint {
                key,
                reason: e.to_string(),
            })
    }

    async fn write_checkpoint(&self, collection: &str, id: &ImageId) -> PipelineResult<()> {
        let key = CollectionKeys::new(collection).checkpoint();
        self.storage
            .put_object(&key, id.as_str().as_bytes().to_vec(), &PutOptions::text())
            .await
            .map_err(|source| PublishError::Checkpoint { key, source })?;
        Ok(())
    }

    fn scratch_dir(&self) -> Result<TempDir, StagingError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORK_DIR_PREFIX);
        let dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(StagingError::WorkDir)
    }
}
