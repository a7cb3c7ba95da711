//! Bucket- and collection-level configuration
//!
//! Configuration lives in two optional JSON objects: `config.json` at the
//! bucket root and `{collection}/config.json`. The collection object wins
//! key by key at the top level only, so a collection `video` object
//! replaces the global one entirely.

use crate::error::{PipelineError, PipelineResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use timelapse_common::{CollectionKeys, Resolution, GLOBAL_CONFIG_KEY};
use timelapse_storage::ObjectStorage;
use tracing::debug;

/// Frame rate used when neither the request nor the config sets one
pub const DEFAULT_FPS: u32 = 30;

/// Which frames survive when more are pending than one run can take
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameLimitPolicy {
    /// Keep the oldest frames; the rest are picked up by later runs
    #[default]
    Oldest,
    /// Keep the newest frames; older pending frames are skipped for good
    Newest,
}

/// The `video` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Folder frames are read from instead of the original uploads
    pub source: Option<String>,
    pub frame_limit: Option<usize>,
    #[serde(default)]
    pub frame_limit_policy: FrameLimitPolicy,
}

impl VideoSettings {
    /// Configured output resolution, only when both sides are set
    #[must_use]
    pub fn resolution(&self) -> Option<Resolution> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(Resolution::new(width, height))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResizeEntry {
    folder: String,
}

/// Merged configuration of one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    values: Map<String, Value>,
}

impl Config {
    /// Shallow merge; keys of `collection` override keys of `global`
    #[must_use]
    pub fn merge(global: Map<String, Value>, collection: Map<String, Value>) -> Self {
        let mut values = global;
        values.extend(collection);
        Self { values }
    }

    #[cfg(test)]
    fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Raw top-level value; `null` counts as absent
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    /// Typed `video` section; defaults when absent or `null`
    pub fn video(&self) -> PipelineResult<VideoSettings> {
        self.typed("video")
    }

    /// Folders named by the `resize` list, in configuration order
    pub fn resize_folders(&self) -> PipelineResult<Vec<String>> {
        let entries: Vec<ResizeEntry> = self.typed("resize")?;
        Ok(entries.into_iter().map(|entry| entry.folder).collect())
    }

    /// Public URL prefix for published window entries, without trailing '/'
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.get("baseUrl")
            .and_then(Value::as_str)
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    fn typed<T>(&self, key: &str) -> PipelineResult<T>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        match self.get(key) {
            None => Ok(T::default()),
            Some(value) => {
                T::deserialize(value).map_err(|e| PipelineError::ConfigRead {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Parse one configuration blob; an empty blob is an empty object
pub fn parse_config_blob(key: &str, data: &[u8]) -> PipelineResult<Map<String, Value>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_slice(data).map_err(|e| PipelineError::ConfigRead {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(PipelineError::ConfigRead {
            key: key.to_string(),
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads and merges the two configuration layers
#[derive(Clone)]
pub struct ConfigResolver {
    storage: Arc<dyn ObjectStorage>,
}

impl ConfigResolver {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    pub async fn resolve(&self, collection: &str) -> PipelineResult<Config> {
        let collection_key = CollectionKeys::new(collection).config();

        let (global, local) = tokio::try_join!(
            self.read_layer(GLOBAL_CONFIG_KEY),
            self.read_layer(&collection_key),
        )?;

        debug!(
            collection,
            global_keys = global.len(),
            collection_keys = local.len(),
            "Resolved configuration"
        );

        Ok(Config::merge(global, local))
    }

    async fn read_layer(&self, key: &str) -> PipelineResult<Map<String, Value>> {
        let data = self
            .storage
            .get_object(key)
            .await
            .map_err(|e| PipelineError::ConfigRead {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        match data {
            Some(data) => parse_config_blob(key, &data),
            None => Ok(Map::new()),
        }
    }
}
