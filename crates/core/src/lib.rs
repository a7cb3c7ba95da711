//! Timelapse index and assembly pipeline
//!
//! Keeps a ranked, time-windowed index of every collection's images and
//! folds new frames into a growing timelapse video.
//!
//! # Components
//! - [`ConfigResolver`]: merges bucket and collection configuration
//! - [`IndexStore`]: loads and saves the newest-first index
//! - [`ExistenceFilter`]: drops entries whose source frame is gone
//! - [`FrameStager`]: downloads frames into a working directory as `000.jpg`, …
//! - [`TimelapsePipeline`]: runs the above and publishes video + checkpoint
//! - [`IngestHandler`] / [`PurgeHandler`]: upload and deletion bookkeeping
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use timelapse_assembler::FfmpegAssembler;
//! use timelapse_core::{RunRequest, TimelapsePipeline};
//! use timelapse_storage::{S3Config, S3ObjectStorage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(S3ObjectStorage::new(S3Config::default()).await?);
//! let pipeline = TimelapsePipeline::new(storage, Arc::new(FfmpegAssembler::default()));
//! let outcome = pipeline.run(&RunRequest::new("cam1")).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod existence;
pub mod handlers;
pub mod index;
pub mod pipeline;
pub mod stager;

pub use config::{Config, ConfigResolver, FrameLimitPolicy, VideoSettings, DEFAULT_FPS};
pub use error::{PipelineError, PipelineResult, PublishError, StagingError};
pub use existence::ExistenceFilter;
pub use handlers::{parse_upload_key, IngestHandler, IngestOutcome, PurgeHandler, UploadKey};
pub use index::{Index, IndexStore, Windows, MAX_INDEX_COUNT};
pub use pipeline::{
    PipelineState, RunOutcome, RunRequest, TimelapsePipeline, LAST_FRAME_METADATA,
    RESOLUTION_METADATA,
};
pub use stager::{FrameStager, StagedFrames};
