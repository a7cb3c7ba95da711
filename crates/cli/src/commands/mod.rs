pub mod encode;
pub mod handlers;
pub mod windows;

use anyhow::{Context as _, Result};
use clap::Args;
use std::sync::Arc;
use timelapse_storage::{ObjectStorage, S3Config, S3ObjectStorage};
use tracing::debug;

/// Bucket connection flags shared by every command
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Bucket holding images, indexes and videos
    #[arg(long, env = "TIMELAPSE_BUCKET")]
    pub bucket: String,

    /// AWS region
    #[arg(long, env = "TIMELAPSE_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom S3 endpoint (e.g. MinIO at http://localhost:9000)
    #[arg(long, env = "TIMELAPSE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Key prefix prepended to every object
    #[arg(long, env = "TIMELAPSE_PREFIX", default_value = "")]
    pub prefix: String,
}

impl StorageArgs {
    pub fn to_config(&self) -> S3Config {
        S3Config {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            prefix: self.prefix.clone(),
            ..S3Config::default()
        }
    }

    pub async fn connect(&self) -> Result<Arc<dyn ObjectStorage>> {
        let config = self.to_config();
        debug!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "Connecting to storage"
        );
        let storage = S3ObjectStorage::new(config)
            .await
            .context("Failed to create S3 client")?;
        Ok(Arc::new(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_args_to_config() {
        let args = StorageArgs {
            bucket: "hubsy".to_string(),
            region: "eu-west-1".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            prefix: "cams/".to_string(),
        };
        let config = args.to_config();
        assert_eq!(config.bucket, "hubsy");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.prefix, "cams/");
    }
}
