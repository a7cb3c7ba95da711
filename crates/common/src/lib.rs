//! Common types shared by the timelapse crates: image identifiers,
//! resolutions and the object key layout of a collection.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Global configuration object, shared by every collection in a bucket
pub const GLOBAL_CONFIG_KEY: &str = "config.json";

/// Folder holding the untouched uploads: `full/{collection}/{id}.jpg`
pub const UPLOAD_FOLDER: &str = "full";

/// Parsing errors for identifiers and resolutions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty image identifier")]
    EmptyId,

    #[error("Invalid image identifier: {0:?}")]
    InvalidId(String),

    #[error("Invalid resolution: {0:?} (expected WIDTHxHEIGHT)")]
    InvalidResolution(String),
}

/// Identifier of one source image.
///
/// The token is an ISO-8601 timestamp with punctuation stripped
/// (e.g. `20161023T130005367Z`), so lexicographic order equals
/// chronological order. Ordering on `ImageId` is plain string ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Parse a token, trimming surrounding whitespace
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(ParseError::EmptyId);
        }
        if token.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ParseError::InvalidId(token.to_string()));
        }
        Ok(Self(token.to_string()))
    }

    /// Build the identifier an upload taken at `at` would carry
    #[must_use]
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y%m%dT%H%M%S%3fZ").to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the timestamp carried by the identifier.
    ///
    /// Punctuation is ignored, so both `20161023T130005367Z` and
    /// `20161023T130005.367Z` decode to the same instant. Returns `None`
    /// for tokens that are not timestamps.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let compact: String = self
            .0
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        if compact.len() < 15 {
            return None;
        }

        let naive = NaiveDateTime::parse_from_str(&compact[..15], "%Y%m%dT%H%M%S").ok()?;
        let millis: String = compact[15..]
            .chars()
            .take_while(char::is_ascii_digit)
            .take(3)
            .collect();
        let millis = if millis.is_empty() {
            0
        } else {
            // Right-pad so ".3" means 300ms
            format!("{millis:0<3}").parse::<i64>().ok()?
        };

        Some(naive.and_utc() + chrono::Duration::milliseconds(millis))
    }

    /// `YYYYMMDD` prefix of the token
    #[must_use]
    pub fn date_prefix(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

/// Video or frame resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X', ':']).ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Object key layout of one collection
#[derive(Debug, Clone, Copy)]
pub struct CollectionKeys<'a> {
    collection: &'a str,
}

impl<'a> CollectionKeys<'a> {
    #[must_use]
    pub const fn new(collection: &'a str) -> Self {
        Self { collection }
    }

    #[must_use]
    pub const fn collection(&self) -> &'a str {
        self.collection
    }

    #[must_use]
    pub fn config(&self) -> String {
        format!("{}/config.json", self.collection)
    }

    #[must_use]
    pub fn index(&self) -> String {
        format!("{}/index.txt", self.collection)
    }

    #[must_use]
    pub fn checkpoint(&self) -> String {
        format!("{}/last-video-index.txt", self.collection)
    }

    #[must_use]
    pub fn video(&self) -> String {
        format!("{}/video.mp4", self.collection)
    }

    /// Key of a source frame, either under an explicit source folder
    /// or the original upload
    #[must_use]
    pub fn source_frame(&self, source: Option<&str>, id: &ImageId) -> String {
        match source {
            Some(folder) => format!("{}/{folder}/{id}.jpg", self.collection),
            None => self.upload(id),
        }
    }

    /// Key of the original upload
    #[must_use]
    pub fn upload(&self, id: &ImageId) -> String {
        format!("{UPLOAD_FOLDER}/{}/{id}.jpg", self.collection)
    }

    /// Key of a derived (resized) variant
    #[must_use]
    pub fn derived_image(&self, folder: &str, id: &ImageId) -> String {
        format!("{}/{folder}/{id}.jpg", self.collection)
    }

    /// Key of a published window index for a derived folder
    #[must_use]
    pub fn window_index(&self, folder: &str, window: &str) -> String {
        format!("{}/{folder}/idx/{window}.txt", self.collection)
    }
}
