//! Ingest and purge commands for upload and deletion events

use super::StorageArgs;
use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use timelapse_core::{IngestHandler, PurgeHandler};
use tracing::{error, info};

#[derive(Args)]
pub struct IngestCommand {
    /// Uploaded object keys (full/{collection}/{id}.jpg)
    #[arg(value_name = "KEY", required = true)]
    keys: Vec<String>,

    #[command(flatten)]
    storage: StorageArgs,
}

impl IngestCommand {
    pub async fn execute(self) -> Result<()> {
        let handler = IngestHandler::new(self.storage.connect().await?);

        // Sequential: uploads of one collection share its index
        let mut failed = 0;
        for key in &self.keys {
            match handler.ingest(key, Utc::now()).await {
                Ok(outcome) => info!(
                    "✓ {}: {} indexed, {} window file(s) written",
                    key,
                    outcome.index_len,
                    outcome.published.len()
                ),
                Err(e) => {
                    error!("✗ {key}: {e}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("{failed} of {} upload(s) failed", self.keys.len());
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct PurgeCommand {
    /// Removed object keys (full/{collection}/{id}.jpg)
    #[arg(value_name = "KEY", required = true)]
    keys: Vec<String>,

    #[command(flatten)]
    storage: StorageArgs,
}

impl PurgeCommand {
    pub async fn execute(self) -> Result<()> {
        let handler = PurgeHandler::new(self.storage.connect().await?);

        let mut failed = 0;
        for key in &self.keys {
            match handler.purge(key).await {
                Ok(deleted) => info!("✓ {}: {} derived image(s) deleted", key, deleted.len()),
                Err(e) => {
                    error!("✗ {key}: {e}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("{failed} of {} deletion(s) failed", self.keys.len());
        }
        Ok(())
    }
}
