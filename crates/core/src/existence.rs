//! Drop index entries whose source frame is gone

use crate::error::{PipelineError, PipelineResult};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use timelapse_common::{CollectionKeys, ImageId};
use timelapse_storage::ObjectStorage;
use tracing::debug;

/// `head` requests in flight at once
pub const MAX_CONCURRENT_CHECKS: usize = 32;

#[derive(Clone)]
pub struct ExistenceFilter {
    storage: Arc<dyn ObjectStorage>,
}

impl ExistenceFilter {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    /// Identifiers whose source frame exists, ascending.
    ///
    /// Checks are `head` requests, at most [`MAX_CONCURRENT_CHECKS`] at a
    /// time. A missing frame is skipped; any other failure fails the whole
    /// filter.
    pub async fn filter_existing(
        &self,
        collection: &str,
        source: Option<&str>,
        candidates: Vec<ImageId>,
    ) -> PipelineResult<Vec<ImageId>> {
        let keys = CollectionKeys::new(collection);
        let total = candidates.len();

        let checks = candidates.into_iter().map(|id| {
            let key = keys.source_frame(source, &id);
            async move {
                match self.storage.object_exists(&key).await {
                    Ok(true) => Ok(Some(id)),
                    Ok(false) => {
                        debug!(key = %key, "Source frame missing, skipping");
                        Ok(None)
                    }
                    Err(source) => Err(PipelineError::ExistenceCheck { key, source }),
                }
            }
        });

        let mut existing: Vec<ImageId> = stream::iter(checks)
            .buffer_unordered(MAX_CONCURRENT_CHECKS)
            .try_collect::<Vec<Option<ImageId>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();
        existing.sort_unstable();

        debug!(collection, total, existing = existing.len(), "Checked source frames");
        Ok(existing)
    }
}
