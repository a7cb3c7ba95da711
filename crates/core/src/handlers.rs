//! Upload and deletion handlers
//!
//! Uploads land at `full/{collection}/{id}.jpg`. Ingesting one adds the id
//! to the collection index and republishes the window indexes of every
//! derived folder named in the `resize` configuration. Purging one deletes
//! the derived copies.

use crate::config::ConfigResolver;
use crate::error::{PipelineError, PipelineResult};
use crate::index::{IndexStore, Windows};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use timelapse_common::{CollectionKeys, ImageId, UPLOAD_FOLDER};
use timelapse_storage::{ObjectStorage, PutOptions};
use tracing::{debug, info};

/// Collection and identifier of an uploaded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadKey {
    pub collection: String,
    pub id: ImageId,
}

/// Parse `full/{collection}/{id}.jpg`; the key may be percent-encoded
pub fn parse_upload_key(key: &str) -> PipelineResult<UploadKey> {
    let invalid = || PipelineError::InvalidKey(key.to_string());

    let decoded = urlencoding::decode(key).map_err(|_| invalid())?;
    let rest = decoded
        .strip_prefix(UPLOAD_FOLDER)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let stem = rest.strip_suffix(".jpg").ok_or_else(invalid)?;
    let (collection, name) = stem.rsplit_once('/').ok_or_else(invalid)?;
    if collection.is_empty() {
        return Err(invalid());
    }
    let id = ImageId::parse(name).map_err(|_| invalid())?;

    Ok(UploadKey {
        collection: collection.to_string(),
        id,
    })
}

/// Body of a published window: one URL per line, a lone newline when empty
#[must_use]
pub fn render_window(
    base_url: Option<&str>,
    collection: &str,
    folder: &str,
    ids: &[ImageId],
) -> String {
    if ids.is_empty() {
        return "\n".to_string();
    }
    let keys = CollectionKeys::new(collection);
    ids.iter()
        .map(|id| {
            let key = keys.derived_image(folder, id);
            match base_url {
                Some(base) => format!("{base}/{key}"),
                None => key,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// What one ingest changed
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub upload: UploadKey,
    pub index_len: usize,
    pub windows: Windows,
    /// Keys of the published window files
    pub published: Vec<String>,
}

#[derive(Clone)]
pub struct IngestHandler {
    storage: Arc<dyn ObjectStorage>,
    config: ConfigResolver,
    index: IndexStore,
}

impl IngestHandler {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            config: ConfigResolver::new(storage.clone()),
            index: IndexStore::new(storage.clone()),
            storage,
        }
    }

    pub async fn ingest(&self, key: &str, now: DateTime<Utc>) -> PipelineResult<IngestOutcome> {
        let upload = parse_upload_key(key)?;
        let collection = upload.collection.as_str();
        info!(collection, id = %upload.id, "Ingesting upload");

        let config = self.config.resolve(collection).await?;
        let folders = config.resize_folders()?;

        let index = self.index.load(collection).await?;
        if index.contains(&upload.id) {
            debug!(collection, id = %upload.id, "Already indexed");
        }
        let index = index.append(upload.id.clone());
        self.index.save(collection, &index).await?;

        let windows = index.windows(now);
        let keys = CollectionKeys::new(collection);
        let base_url = config.base_url();

        let writes = folders.iter().flat_map(|folder| {
            windows.named().into_iter().map(move |(name, ids)| {
                let key = keys.window_index(folder, name);
                let body = render_window(base_url, collection, folder, ids);
                async move {
                    debug!(key = %key, entries = ids.len(), "Publishing window");
                    self.storage
                        .put_object(&key, body.into_bytes(), &PutOptions::text())
                        .await
                        .map_err(|source| PipelineError::IndexWrite {
                            key: key.clone(),
                            source,
                        })?;
                    Ok::<_, PipelineError>(key)
                }
            })
        });
        let published = try_join_all(writes).await?;

        info!(
            collection,
            entries = index.len(),
            windows = published.len(),
            "Updated indexes"
        );

        Ok(IngestOutcome {
            index_len: index.len(),
            upload,
            windows,
            published,
        })
    }
}

#[derive(Clone)]
pub struct PurgeHandler {
    storage: Arc<dyn ObjectStorage>,
    config: ConfigResolver,
}

impl PurgeHandler {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            config: ConfigResolver::new(storage.clone()),
            storage,
        }
    }

    /// Delete the derived copies of a removed upload; returns the deleted keys
    pub async fn purge(&self, key: &str) -> PipelineResult<Vec<String>> {
        let upload = parse_upload_key(key)?;
        let collection = upload.collection.as_str();

        let config = self.config.resolve(collection).await?;
        let keys = CollectionKeys::new(collection);

        let deletes = config.resize_folders()?.into_iter().map(|folder| {
            let key = keys.derived_image(&folder, &upload.id);
            async move {
                self.storage.delete_object(&key).await?;
                Ok::<_, PipelineError>(key)
            }
        });
        let deleted = try_join_all(deletes).await?;

        info!(collection, id = %upload.id, deleted = deleted.len(), "Purged derived images");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ImageId {
        ImageId::parse(s).unwrap()
    }

    #[test]
    fn test_parse_upload_key() {
        let upload = parse_upload_key("full/cam1/20161023T130005367Z.jpg").unwrap();
        assert_eq!(upload.collection, "cam1");
        assert_eq!(upload.id.as_str(), "20161023T130005367Z");
    }

    #[test]
    fn test_parse_upload_key_decodes_and_nests() {
        let upload = parse_upload_key("full/site%2Fcam1/20161023T130005.367Z.jpg").unwrap();
        assert_eq!(upload.collection, "site/cam1");
        assert_eq!(upload.id.as_str(), "20161023T130005.367Z");

        let encoded = parse_upload_key("full/cam1/20161023T13%3A00%3A05.367Z.jpg").unwrap();
        assert_eq!(encoded.id.as_str(), "20161023T13:00:05.367Z");
    }

    #[test]
    fn test_parse_upload_key_rejects_other_keys() {
        for key in [
            "cam1/hd/20161023T130005367Z.jpg",
            "full/cam1/20161023T130005367Z.png",
            "full/20161023T130005367Z.jpg",
            "full//20161023T130005367Z.jpg",
            "full/cam1/.jpg",
        ] {
            assert!(
                matches!(parse_upload_key(key), Err(PipelineError::InvalidKey(_))),
                "accepted {key}"
            );
        }
    }

    #[test]
    fn test_render_window() {
        let ids = [id("b"), id("a")];
        assert_eq!(
            render_window(Some("https://cdn.example.com"), "cam1", "hd", &ids),
            "https://cdn.example.com/cam1/hd/b.jpg\nhttps://cdn.example.com/cam1/hd/a.jpg"
        );
        assert_eq!(
            render_window(None, "cam1", "hd", &ids),
            "cam1/hd/b.jpg\ncam1/hd/a.jpg"
        );
        assert_eq!(render_window(None, "cam1", "hd", &[]), "\n");
    }
}
