//! Test doubles for the pipeline suites
//!
//! - [`FakeAssembler`]: a scripted encoder. Frames are `WxH|payload` blobs;
//!   a "video" is a `WxH` header line followed by one payload per frame, so
//!   tests can read back exactly which frames a video contains.
//! - [`FlakyStorage`]: [`MemoryObjectStorage`] with per-key failure injection.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use timelapse_assembler::{
    count_frames, frame_file_name, requested_target, validate_fps, AssembleRequest,
    AssembledVideo, AssemblyError, VideoAssembler,
};
use timelapse_common::{ImageId, Resolution};
use timelapse_storage::{
    MemoryObjectStorage, ObjectHead, ObjectStorage, PutOptions, StorageError, StorageResult,
};

pub const FRAME_RESOLUTION: Resolution = Resolution::new(640, 480);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixed reference time so windows are deterministic
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 10, 23, 13, 0, 0).unwrap()
}

/// Identifier of the `n`-th image, one minute apart
pub fn image_id(n: i64) -> ImageId {
    ImageId::from_timestamp(base_time() + Duration::minutes(n))
}

pub fn frame_blob(resolution: Resolution, payload: &str) -> Vec<u8> {
    format!("{resolution}|{payload}").into_bytes()
}

/// Upload frames and list them in the index, like a run of ingests would
pub async fn seed_frames(storage: &MemoryObjectStorage, collection: &str, ids: &[ImageId]) {
    for id in ids {
        storage
            .insert(
                &format!("full/{collection}/{id}.jpg"),
                frame_blob(FRAME_RESOLUTION, id.as_str()),
            )
            .await;
    }
    let key = format!("{collection}/index.txt");
    let existing = storage
        .get_object(&key)
        .await
        .unwrap()
        .map(|data| String::from_utf8(data).unwrap())
        .unwrap_or_default();
    let existing = timelapse_core::Index::parse(&existing);
    let index = timelapse_core::Index::from_ids(
        existing.ids().iter().cloned().chain(ids.iter().cloned()),
    );
    storage.insert(&key, index.to_text().into_bytes()).await;
}

/// Header resolution and frame payloads of a collection's video
pub async fn video_contents(
    storage: &MemoryObjectStorage,
    collection: &str,
) -> Option<(String, Vec<String>)> {
    let data = storage
        .get_object(&format!("{collection}/video.mp4"))
        .await
        .unwrap()?;
    let text = String::from_utf8(data).unwrap();
    let mut lines = text.lines().map(str::to_string);
    let header = lines.next().unwrap_or_default();
    Some((header, lines.collect()))
}

pub async fn checkpoint(storage: &MemoryObjectStorage, collection: &str) -> Option<String> {
    storage
        .get_object(&format!("{collection}/last-video-index.txt"))
        .await
        .unwrap()
        .map(|data| String::from_utf8(data).unwrap())
}

fn read_header(data: &[u8]) -> Option<Resolution> {
    let text = std::str::from_utf8(data).ok()?;
    let end = text.find(['|', '\n']).unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Recorded assembler call
#[derive(Debug, Clone)]
pub struct AssembleCall {
    pub fps: u32,
    pub frames: usize,
    pub previous: Option<Resolution>,
    pub requested: Option<Resolution>,
    pub target: Resolution,
}

#[derive(Default)]
pub struct FakeAssembler {
    calls: Mutex<Vec<AssembleCall>>,
    probes: Mutex<usize>,
    fail: Mutex<bool>,
}

impl FakeAssembler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<AssembleCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `probe_resolution` calls made by the pipeline
    pub fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }

    fn probe_blob(path: &Path) -> Result<Resolution, AssemblyError> {
        let data = std::fs::read(path)?;
        read_header(&data).ok_or_else(|| AssemblyError::Probe {
            path: path.display().to_string(),
            reason: "no header".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl VideoAssembler for FakeAssembler {
    async fn probe_resolution(&self, media: &Path) -> Result<Resolution, AssemblyError> {
        *self.probes.lock().unwrap() += 1;
        Self::probe_blob(media)
    }

    async fn assemble(&self, request: AssembleRequest) -> Result<AssembledVideo, AssemblyError> {
        let fps = validate_fps(request.fps)?;
        let frame_count = count_frames(&request.frames_dir)?;
        if *self.fail.lock().unwrap() {
            return Err(AssemblyError::ProcessFailed {
                program: "ffmpeg".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "scripted failure".to_string(),
            });
        }

        let target = match requested_target(request.resolution, request.previous.as_ref()) {
            Some(target) => target,
            None => Self::probe_blob(&request.frames_dir.join(frame_file_name(0)))?,
        };

        let mut lines = vec![target.to_string()];
        if let Some(previous) = &request.previous {
            let text = std::fs::read_to_string(&previous.path)?;
            lines.extend(text.lines().skip(1).map(str::to_string));
        }
        for position in 0..frame_count {
            let data = std::fs::read(request.frames_dir.join(frame_file_name(position)))?;
            let text = String::from_utf8_lossy(&data);
            let payload = text.split_once('|').map_or(&*text, |(_, p)| p);
            lines.push(payload.to_string());
        }

        let path = request.output_dir.join("video.mp4");
        std::fs::write(&path, lines.join("\n"))?;

        self.calls.lock().unwrap().push(AssembleCall {
            fps,
            frames: frame_count,
            previous: request.previous.as_ref().map(|p| p.resolution),
            requested: request.resolution,
            target,
        });

        Ok(AssembledVideo {
            path,
            resolution: target,
            frame_count,
        })
    }
}

/// Memory storage that fails chosen operations on chosen keys
#[derive(Clone, Default)]
pub struct FlakyStorage {
    pub inner: MemoryObjectStorage,
    failing_puts: Arc<Mutex<HashSet<String>>>,
    failing_heads: Arc<Mutex<HashSet<String>>>,
    puts: Arc<Mutex<Vec<String>>>,
}

impl FlakyStorage {
    pub fn new(inner: MemoryObjectStorage) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_puts_to(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_heads_of(&self, key: &str) {
        self.failing_heads.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_puts.lock().unwrap().clear();
        self.failing_heads.lock().unwrap().clear();
    }

    /// Keys written so far, in order
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    fn check_put(&self, key: &str) -> StorageResult<()> {
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(StorageError::S3Error(format!("injected put failure: {key}")));
        }
        self.puts.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStorage for FlakyStorage {
    async fn get_object(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_object(key).await
    }

    async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> StorageResult<String> {
        self.check_put(key)?;
        self.inner.put_object(key, data, options).await
    }

    async fn put_object_from_path(
        &self,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StorageResult<String> {
        self.check_put(key)?;
        self.inner.put_object_from_path(key, path, options).await
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> StorageResult<()> {
        self.inner.download_to_path(key, path).await
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        if self.failing_heads.lock().unwrap().contains(key) {
            return Err(StorageError::S3Error(format!("injected head failure: {key}")));
        }
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.inner.delete_object(key).await
    }
}
