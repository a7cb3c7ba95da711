//! Copy source frames into a fresh working directory
//!
//! Frames are written as `000.jpg`, `001.jpg`, ... in the order given, which
//! is the order the encoder reads them in.

use crate::error::StagingError;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use timelapse_assembler::{frame_file_name, MAX_FRAMES};
use timelapse_common::{CollectionKeys, ImageId};
use timelapse_storage::ObjectStorage;
use tracing::{debug, info};

/// Prefix of every working directory
pub const WORK_DIR_PREFIX: &str = "timelapse-";

/// Downloads in flight at once; each holds a connection and an open file
pub const MAX_CONCURRENT_DOWNLOADS: usize = 32;

/// Frames on local disk; the directory is removed on drop
#[derive(Debug)]
pub struct StagedFrames {
    dir: TempDir,
    ids: Vec<ImageId>,
}

impl StagedFrames {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Staged identifiers in frame order
    #[must_use]
    pub fn ids(&self) -> &[ImageId] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Remove the directory now, reporting failures
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Reject inputs the 3-digit frame numbering cannot hold
pub fn check_frame_count(count: usize) -> Result<(), StagingError> {
    if count == 0 {
        return Err(StagingError::Empty);
    }
    if count > MAX_FRAMES {
        return Err(StagingError::TooManyFrames {
            count,
            max: MAX_FRAMES,
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct FrameStager {
    storage: Arc<dyn ObjectStorage>,
    work_root: Option<std::path::PathBuf>,
}

impl FrameStager {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage,
            work_root: None,
        }
    }

    /// Create working directories under `root` instead of the system temp dir
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Download `ids` (ascending) into a new working directory.
    ///
    /// The count is checked before anything is created. On any download
    /// failure the directory is removed and the error returned.
    pub async fn stage(
        &self,
        collection: &str,
        ids: Vec<ImageId>,
        source: Option<&str>,
    ) -> Result<StagedFrames, StagingError> {
        check_frame_count(ids.len())?;

        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(WORK_DIR_PREFIX);
            builder
        };
        let dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(StagingError::WorkDir)?;

        info!(
            collection,
            frames = ids.len(),
            dir = %dir.path().display(),
            "Staging frames"
        );

        let keys = CollectionKeys::new(collection);
        let downloads = ids.iter().enumerate().map(|(position, id)| {
            let key = keys.source_frame(source, id);
            let dest = dir.path().join(frame_file_name(position));
            async move {
                self.storage
                    .download_to_path(&key, &dest)
                    .await
                    .map_err(|source| StagingError::Download { key, source })
            }
        })
        .collect::<Vec<_>>();

        // `dir` is dropped (and removed) if this fails
        stream::iter(downloads)
            .buffer_unordered(MAX_CONCURRENT_DOWNLOADS)
            .try_collect::<Vec<()>>()
            .await?;

        debug!(collection, frames = ids.len(), "Staged all frames");
        Ok(StagedFrames { dir, ids })
    }
}
