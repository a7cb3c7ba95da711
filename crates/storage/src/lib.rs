//! Storage layer for the timelapse pipeline
//!
//! This module provides the object storage collaborator used by every
//! pipeline stage:
//! - **S3 (or MinIO)**: source frames, index blobs, checkpoints, videos
//! - **In-memory**: a process-local backend for tests
//!
//! Reads of missing objects are explicit: [`ObjectStorage::get_object`] and
//! [`ObjectStorage::head_object`] return `Ok(None)` instead of an error, so
//! callers never have to pattern-match on "no such key" failures.
//!
//! # Example
//!
//! ```rust,no_run
//! use timelapse_storage::{ObjectStorage, PutOptions, S3Config, S3ObjectStorage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = S3ObjectStorage::new(S3Config::default()).await?;
//!
//!     storage
//!         .put_object("cam1/index.txt", b"20161023T130005367Z".to_vec(), &PutOptions::text())
//!         .await?;
//!
//!     let index = storage.get_object("cam1/index.txt").await?;
//!     assert!(index.is_some());
//!
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use thiserror::Error;

pub mod memory_storage;
pub mod object_storage;

pub use memory_storage::MemoryObjectStorage;
pub use object_storage::{ObjectStorage, S3Config, S3ObjectStorage};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Headers attached to an uploaded object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// User metadata (`x-amz-meta-*` on S3)
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    /// Plain-text blob that clients must always revalidate
    #[must_use]
    pub fn text() -> Self {
        Self::new("text/plain").no_cache()
    }

    #[must_use]
    pub fn new(content_type: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache_control = Some("no-cache".to_string());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Metadata returned by a `head` request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}
