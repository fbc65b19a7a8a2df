#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediakb::config::ConfDir;
use mediakb::media::{ContentHash, KindMatcher, MediaItem, MediaKind, NewRecord, Target};
use mediakb::models::*;
use mediakb::{MediaLibrary, MediaLibraryBuilder, ModelError, Retention};
use tempfile::TempDir;

/// 把图片内容当作描述文本
///
/// - 包含 `FAIL` 时总是失败
/// - 包含 `FLAKY` 时前两次调用失败
/// - 包含 `HANG` 时永不返回
#[derive(Default, Clone)]
pub struct EchoDescriptor {
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
}

impl EchoDescriptor {
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaDescriptor for EchoDescriptor {
    async fn describe(&self, image: &[u8]) -> Result<Caption, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = String::from_utf8_lossy(image).trim().to_owned();
        if text.contains("HANG") {
            std::future::pending::<()>().await;
        }
        if text.contains("FAIL") {
            return Err(ModelError::Failed(format!("cannot describe {text}")));
        }
        if text.contains("FLAKY") {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(text.clone()).or_default();
            *n += 1;
            if *n <= 2 {
                return Err(ModelError::Failed("flaky".into()));
            }
        }
        Ok(Caption { text, score: 1.0 })
    }
}

/// 视频文件内容为以 `|` 分隔的帧，第 i 帧位于 i 秒
pub struct SplitExtractor;

impl KeyframeExtractor for SplitExtractor {
    async fn extract(&self, _path: &Path, video: &[u8], config: ExtractConfig) -> Result<Vec<Frame>, ModelError> {
        let text = String::from_utf8_lossy(video);
        if text.trim() == "NOFRAMES" {
            return Ok(vec![]);
        }
        Ok(text
            .split('|')
            .take(config.max_keyframes)
            .enumerate()
            .map(|(i, part)| Frame { timestamp_ms: i as i64 * 1000, data: part.trim().as_bytes().to_vec() })
            .collect())
    }
}

/// 总是返回同一个向量，并记录调用次数
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FixedEmbedder {
    fn dim(&self) -> usize {
        self.vector.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

/// 与 [1, 0] 的余弦相似度为 `cos` 的单位向量
pub fn at(cos: f32) -> Vec<f32> {
    vec![cos, (1. - cos * cos).sqrt()]
}

pub async fn open_library(dir: &TempDir, retention: Retention) -> Arc<MediaLibrary> {
    let library = MediaLibraryBuilder::new(ConfDir::new(dir.path()))
        .retention(retention)
        .open()
        .await
        .unwrap();
    Arc::new(library)
}

pub fn kinds() -> KindMatcher {
    KindMatcher::new("jpg,png", "mp4").unwrap()
}

pub async fn add_media(library: &MediaLibrary, name: &str, kind: MediaKind) -> MediaItem {
    let hash = ContentHash::of(name.as_bytes());
    library.add_media(&hash, kind, name, name.len() as i64).await.unwrap().0
}

pub fn record(media_id: i64, target: Target, caption: &str, embedding: Vec<f32>) -> NewRecord {
    NewRecord {
        media_id,
        target,
        caption: caption.to_owned(),
        score: 1.0,
        model_version: "test".to_owned(),
        embedding,
    }
}
