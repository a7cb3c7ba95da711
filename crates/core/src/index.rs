//! Ranked index of a collection's images
//!
//! The index is a newline-separated list of identifiers, newest first,
//! stored at `{collection}/index.txt`. Only the newest [`MAX_INDEX_COUNT`]
//! identifiers are kept; older images stay in the bucket but drop out of
//! the index.

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use timelapse_common::{CollectionKeys, ImageId};
use timelapse_storage::{ObjectStorage, PutOptions};
use tracing::{debug, warn};

/// Largest number of identifiers an index retains
pub const MAX_INDEX_COUNT: usize = 5000;

/// Number of entries in the `last100` window
pub const RECENT_COUNT: usize = 100;

/// Ordered, duplicate-free identifiers, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    ids: Vec<ImageId>,
}

impl Index {
    /// Build an index from arbitrary identifiers, restoring the invariants
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = ImageId>) -> Self {
        let mut ids: Vec<ImageId> = ids.into_iter().collect();
        normalize(&mut ids);
        Self { ids }
    }

    /// Parse the stored text form, skipping blank and malformed lines
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::from_ids(text.lines().filter_map(|line| {
            if line.trim().is_empty() {
                return None;
            }
            match ImageId::parse(line) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(line, error = %e, "Skipping malformed index line");
                    None
                }
            }
        }))
    }

    /// Stored text form
    #[must_use]
    pub fn to_text(&self) -> String {
        self.ids
            .iter()
            .map(ImageId::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A new index with `id` added
    #[must_use]
    pub fn append(&self, id: ImageId) -> Self {
        let mut ids = Vec::with_capacity(self.ids.len() + 1);
        ids.push(id);
        ids.extend(self.ids.iter().cloned());
        normalize(&mut ids);
        Self { ids }
    }

    #[must_use]
    pub fn ids(&self) -> &[ImageId] {
        &self.ids
    }

    #[must_use]
    pub fn newest(&self) -> Option<&ImageId> {
        self.ids.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ImageId) -> bool {
        self.ids.binary_search_by(|probe| id.cmp(probe)).is_ok()
    }

    /// Entries strictly newer than `checkpoint`, oldest first.
    ///
    /// Without a checkpoint every entry is pending.
    #[must_use]
    pub fn newer_than(&self, checkpoint: Option<&ImageId>) -> Vec<ImageId> {
        let newer = match checkpoint {
            Some(checkpoint) => self
                .ids
                .iter()
                .take_while(|id| *id > checkpoint)
                .cloned()
                .collect::<Vec<_>>(),
            None => self.ids.clone(),
        };
        newer.into_iter().rev().collect()
    }

    /// Time-based and positional views of the index at `now`
    #[must_use]
    pub fn windows(&self, now: DateTime<Utc>) -> Windows {
        let within = |days: i64| -> Vec<ImageId> {
            let cutoff = now - Duration::days(days);
            self.ids
                .iter()
                .filter(|id| id.timestamp().is_some_and(|at| at > cutoff))
                .cloned()
                .collect()
        };

        let last_30_days = within(30);
        let last_7_days = within(7);
        let last_24_hours = within(1);
        let today_prefix = now.format("%Y%m%d").to_string();
        let today = last_24_hours
            .iter()
            .filter(|id| id.date_prefix() == today_prefix)
            .cloned()
            .collect();

        Windows {
            last: self.ids.iter().take(1).cloned().collect(),
            last_100: self.ids.iter().take(RECENT_COUNT).cloned().collect(),
            today,
            last_24_hours,
            last_7_days,
            last_30_days,
        }
    }
}

/// Sort descending, dedupe, truncate
fn normalize(ids: &mut Vec<ImageId>) {
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.dedup();
    ids.truncate(MAX_INDEX_COUNT);
}

/// Windows published next to each derived image folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Windows {
    pub last: Vec<ImageId>,
    #[serde(rename = "last100")]
    pub last_100: Vec<ImageId>,
    pub today: Vec<ImageId>,
    #[serde(rename = "24hr")]
    pub last_24_hours: Vec<ImageId>,
    #[serde(rename = "7days")]
    pub last_7_days: Vec<ImageId>,
    #[serde(rename = "30days")]
    pub last_30_days: Vec<ImageId>,
}

impl Windows {
    /// Windows paired with their published names
    #[must_use]
    pub fn named(&self) -> [(&'static str, &[ImageId]); 6] {
        [
            ("last", self.last.as_slice()),
            ("last100", self.last_100.as_slice()),
            ("today", self.today.as_slice()),
            ("24hr", self.last_24_hours.as_slice()),
            ("7days", self.last_7_days.as_slice()),
            ("30days", self.last_30_days.as_slice()),
        ]
    }
}

/// Loads and saves collection indexes
#[derive(Clone)]
pub struct IndexStore {
    storage: Arc<dyn ObjectStorage>,
}

impl IndexStore {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    /// Current index; empty when none was saved yet
    pub async fn load(&self, collection: &str) -> PipelineResult<Index> {
        let key = CollectionKeys::new(collection).index();
        let index = match self.storage.get_object(&key).await? {
            Some(data) => Index::parse(&String::from_utf8_lossy(&data)),
            None => {
                debug!(collection, "No index yet");
                Index::default()
            }
        };
        debug!(collection, entries = index.len(), "Loaded index");
        Ok(index)
    }

    /// Overwrite the stored index in a single put
    pub async fn save(&self, collection: &str, index: &Index) -> PipelineResult<()> {
        let key = CollectionKeys::new(collection).index();
        self.storage
            .put_object(&key, index.to_text().into_bytes(), &PutOptions::text())
            .await
            .map_err(|source| PipelineError::IndexWrite {
                key: key.clone(),
                source,
            })?;
        debug!(collection, entries = index.len(), "Saved index");
        Ok(())
    }
}
