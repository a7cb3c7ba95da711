use thiserror::Error;
use timelapse_assembler::AssemblyError;
use timelapse_storage::StorageError;

/// Errors raised while publishing a run's results
#[derive(Error, Debug)]
pub enum PublishError {
    /// Nothing was committed; the checkpoint was not touched
    #[error("Failed to upload video {key}: {source}")]
    Video {
        key: String,
        #[source]
        source: StorageError,
    },

    /// The video is live but the checkpoint still points at the previous run
    #[error("Video uploaded but checkpoint {key} was not written: {source}")]
    Checkpoint {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Errors raised while copying source frames into a working directory
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("No frames to stage")]
    Empty,

    #[error("Too many frames to stage: {count} (max: {max})")]
    TooManyFrames { count: usize, max: usize },

    #[error("Failed to download {key}: {source}")]
    Download {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to create working directory: {0}")]
    WorkDir(#[source] std::io::Error),
}

/// Errors of a pipeline, ingest or purge run.
///
/// Every variant except [`PublishError::Checkpoint`] is raised before
/// anything was committed, so the run can be retried as is.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read configuration {key}: {reason}")]
    ConfigRead { key: String, reason: String },

    #[error("Failed to write index {key}: {source}")]
    IndexWrite {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Existence check failed for {key}: {source}")]
    ExistenceCheck {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    /// The stored checkpoint is not an identifier; the bucket needs repair
    #[error("Corrupt checkpoint {key}: {reason}")]
    CorruptCheckpoint { key: String, reason: String },

    #[error("No frames available to start a video for {0}")]
    NoFrames(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
