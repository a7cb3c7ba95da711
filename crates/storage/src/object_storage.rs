//! Object storage implementation using S3/MinIO
//!
//! This module provides the interface for storing and retrieving collection
//! objects: configuration and index blobs, source frames and videos.

use crate::{ObjectHead, PutOptions, StorageError, StorageResult};
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// S3/MinIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (e.g., "us-east-1")
    pub region: String,

    /// S3 endpoint (custom for `MinIO`, empty for AWS S3)
    pub endpoint: Option<String>,

    /// AWS access key ID (empty = use the default credential chain)
    pub access_key_id: String,

    /// AWS secret access key
    pub secret_access_key: String,

    /// Path prefix for all objects (e.g., "timelapse/")
    pub prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "timelapse".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            prefix: String::new(),
        }
    }
}

/// Object storage trait
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch an object; `Ok(None)` when the key does not exist
    async fn get_object(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store (overwrite) an object in a single put
    async fn put_object(&self, key: &str, data: Vec<u8>, options: &PutOptions)
        -> StorageResult<String>;

    /// Store (overwrite) an object from a local file
    async fn put_object_from_path(
        &self,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StorageResult<String>;

    /// Download an object to a local path; [`StorageError::NotFound`] when missing
    async fn download_to_path(&self, key: &str, path: &Path) -> StorageResult<()>;

    /// Metadata-only lookup; `Ok(None)` when the key does not exist
    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectHead>>;

    /// Check if an object exists
    async fn object_exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.head_object(key).await?.is_some())
    }

    /// Delete an object
    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}

/// S3/MinIO object storage implementation
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStorage {
    /// Create a new S3 object storage client
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::InvalidConfig("bucket name is empty".to_string()));
        }

        let region = Region::new(config.region.clone());

        let mut s3_config_builder = if config.access_key_id.is_empty() {
            // Instance profile, SSO, shared config file...
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        } else {
            let credentials = Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "timelapse-storage",
            );
            aws_sdk_s3::Config::builder()
                .credentials_provider(credentials)
                .region(region)
                .behavior_version_latest()
        };

        // Set custom endpoint for MinIO
        if let Some(endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    /// Combine prefix with key
    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }
}

fn s3_error<E: std::error::Error>(err: E) -> StorageError {
    StorageError::S3Error(DisplayErrorContext(err).to_string())
}

#[async_trait::async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn get_object(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        debug!(key = %full_key, "get_object");

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(s3_error(e));
            }
        };

        let bytes = response.body.collect().await.map_err(s3_error)?;

        Ok(Some(bytes.to_vec()))
    }

    async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> StorageResult<String> {
        let full_key = self.full_key(key);
        debug!(key = %full_key, bytes = data.len(), "put_object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(data))
            .set_content_type(options.content_type.clone())
            .set_cache_control(options.cache_control.clone())
            .set_metadata((!options.metadata.is_empty()).then(|| options.metadata.clone()))
            .send()
            .await
            .map_err(s3_error)?;

        Ok(full_key)
    }

    async fn put_object_from_path(
        &self,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StorageResult<String> {
        let full_key = self.full_key(key);
        debug!(key = %full_key, path = %path.display(), "put_object_from_path");

        let body = ByteStream::from_path(path).await.map_err(s3_error)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(body)
            .set_content_type(options.content_type.clone())
            .set_cache_control(options.cache_control.clone())
            .set_metadata((!options.metadata.is_empty()).then(|| options.metadata.clone()))
            .send()
            .await
            .map_err(s3_error)?;

        Ok(full_key)
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> StorageResult<()> {
        let full_key = self.full_key(key);
        debug!(key = %full_key, path = %path.display(), "download_to_path");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(full_key.clone())
                } else {
                    s3_error(e)
                }
            })?;

        let reader = response.body.into_async_read();
        tokio::pin!(reader);
        let mut file = tokio::fs::File::create(path).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        Ok(())
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        let full_key = self.full_key(key);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(response) => Ok(Some(ObjectHead {
                size: response
                    .content_length()
                    .and_then(|len| u64::try_from(len).ok())
                    .unwrap_or(0),
                content_type: response.content_type().map(str::to_string),
                metadata: response.metadata().cloned().unwrap_or_default(),
            })),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(None)
                } else {
                    Err(s3_error(e))
                }
            }
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);
        debug!(key = %full_key, "delete_object");

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(s3_error)?;

        Ok(())
    }
}
