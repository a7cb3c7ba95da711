//! Windows command - print a collection's current windows

use super::StorageArgs;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use timelapse_core::IndexStore;

#[derive(Args)]
pub struct WindowsCommand {
    /// Collection (camera) name
    collection: String,

    #[command(flatten)]
    storage: StorageArgs,

    /// Reference time in RFC 3339 (default: now)
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

impl WindowsCommand {
    pub async fn execute(self) -> Result<()> {
        let store = IndexStore::new(self.storage.connect().await?);
        let index = store
            .load(&self.collection)
            .await
            .with_context(|| format!("Failed to load index of {}", self.collection))?;

        let windows = index.windows(self.now.unwrap_or_else(Utc::now));
        let json = serde_json::to_string_pretty(&windows)?;
        println!("{json}");
        Ok(())
    }
}
