//! 单个媒体项的入库流程：抽帧、描述、向量化、写入
//!
//! 每个单元（图片本身、视频整体、每个关键帧）独立重试、独立提交，
//! 一个单元失败不会影响其他单元。

mod report;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use log::{debug, error, info, warn};
pub use report::*;

use crate::error::{Error, ModelError, Result};
use crate::library::MediaLibrary;
use crate::media::*;
use crate::metrics;
use crate::models::*;
use crate::singleflight::SingleFlight;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 写入描述记录的模型版本
    pub model_version: String,
    pub extract: ExtractConfig,
    /// 单个视频内同时处理的单元数量
    pub unit_concurrency: usize,
    /// 每次模型调用失败后的最大重试次数
    pub retry_limit: usize,
    /// 单次模型调用的超时时间
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_version: "default".into(),
            extract: ExtractConfig { threshold: 0.3, max_keyframes: 32 },
            unit_concurrency: 4,
            retry_limit: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// 一个待处理的单元
struct Job {
    unit: Unit,
    target: Target,
    input: Input,
}

enum Input {
    Image(Arc<Vec<u8>>),
    Video(Arc<Vec<Frame>>),
}

enum Outcome {
    Committed,
    Skipped,
    Failed(UnitFailure),
}

struct Inner<D, K, E> {
    library: Arc<MediaLibrary>,
    descriptor: D,
    extractor: K,
    embedder: Arc<E>,
    config: PipelineConfig,
}

pub struct IngestionPipeline<D, K, E> {
    inner: Arc<Inner<D, K, E>>,
    kinds: KindMatcher,
    flight: SingleFlight<ContentHash, Result<IngestReport>>,
}

impl<D, K, E> IngestionPipeline<D, K, E>
where
    D: MediaDescriptor,
    K: KeyframeExtractor,
    E: Embedder,
{
    pub fn new(
        library: Arc<MediaLibrary>,
        descriptor: D,
        extractor: K,
        embedder: Arc<E>,
        config: PipelineConfig,
        kinds: KindMatcher,
    ) -> Self {
        Self {
            inner: Arc::new(Inner { library, descriptor, extractor, embedder, config }),
            kinds,
            flight: SingleFlight::new(),
        }
    }

    pub fn library(&self) -> &Arc<MediaLibrary> {
        &self.inner.library
    }

    pub fn kind_of(&self, path: &Path) -> Option<MediaKind> {
        self.kinds.kind_of(path)
    }

    /// 入库一个文件，媒体类型由后缀名决定
    ///
    /// 丢弃返回的 future 即取消本次入库：已提交的单元保留，之后重新入库时会被跳过，
    /// 未提交的单元不会在数据库或索引中留下任何内容。
    pub async fn ingest(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let path = path.as_ref();
        let kind = self
            .kinds
            .kind_of(path)
            .ok_or_else(|| Error::ingestion(path.display().to_string(), "unsupported file type"))?;
        self.ingest_as(path, kind).await
    }

    /// 以指定的媒体类型入库一个文件
    pub async fn ingest_as(&self, path: impl AsRef<Path>, kind: MediaKind) -> Result<IngestReport> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        let data = tokio::fs::read(&path).await.map_err(|e| Error::ingestion(&shown, e))?;
        if data.is_empty() {
            return Err(Error::ingestion(&shown, "empty file"));
        }
        let (data, hash) = tokio::task::spawn_blocking(move || {
            let hash = ContentHash::of(&data);
            (data, hash)
        })
        .await
        .map_err(|_| Error::Cancelled)?;

        let inner = self.inner.clone();
        let work = {
            let hash = hash.clone();
            async move { inner.ingest_item(path, kind, hash, data).await }
        };
        let (result, joined) = self.flight.run(hash.clone(), work).await;
        if joined {
            debug!("{shown} 与正在进行的入库 {hash} 合并");
        }

        match &result {
            Ok(report) => metrics::inc_ingest(report.status.as_str()),
            Err(e) => {
                error!("{shown}: {e}");
                metrics::inc_ingest("error");
            }
        }
        result
    }
}

impl<D, K, E> Inner<D, K, E>
where
    D: MediaDescriptor,
    K: KeyframeExtractor,
    E: Embedder,
{
    async fn ingest_item(
        &self,
        path: PathBuf,
        kind: MediaKind,
        hash: ContentHash,
        data: Vec<u8>,
    ) -> Result<IngestReport> {
        let start = Instant::now();
        let shown = path.display().to_string();

        if let Some(dim) = self.library.index_dim().await {
            if dim != self.embedder.dim() {
                return Err(Error::InvalidArgument(format!(
                    "embedder produces {} dimensions, index has {dim}",
                    self.embedder.dim()
                )));
            }
        }

        let (media, created) = self.library.add_media(&hash, kind, &shown, data.len() as i64).await?;
        if created {
            debug!("新媒体项 {} ({}): {shown}", media.id, media.kind.as_str());
        }

        let jobs = match media.kind {
            MediaKind::Image => {
                let data = Arc::new(data);
                self.write_preview(&media, &data).await;
                vec![Job { unit: Unit::Whole, target: Target::Media(media.id), input: Input::Image(data) }]
            }
            MediaKind::Video => {
                if self.video_is_current(media.id).await? {
                    debug!("{shown} 已是最新，跳过抽帧");
                    let skipped = self.library.keyframes(media.id).await?.len() + 1;
                    return Ok(IngestReport::new(media, 0, skipped, vec![]));
                }
                match self.video_jobs(&path, &media, data).await {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        // 首次入库就失败的视频不保留媒体项
                        if created {
                            self.library.delete_cascade(media.id).await?;
                            debug!("撤销新媒体项 {}: {shown}", media.id);
                        }
                        return Err(e);
                    }
                }
            }
        };

        let outcomes = futures::stream::iter(jobs)
            .map(|job| self.run_unit(media.id, job))
            .buffer_unordered(self.config.unit_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let (mut succeeded, mut skipped, mut failures) = (0, 0, vec![]);
        for outcome in outcomes {
            match outcome {
                Outcome::Committed => succeeded += 1,
                Outcome::Skipped => skipped += 1,
                Outcome::Failed(failure) => {
                    warn!("{shown} {} 在 {} 阶段失败: {}", failure.unit, failure.stage.as_str(), failure.error);
                    metrics::inc_unit_failure(failure.stage.as_str());
                    failures.push(failure);
                }
            }
        }

        let report = IngestReport::new(media, succeeded, skipped, failures);
        info!(
            "{shown}: {} ({}/{} 单元), 耗时 {:.2}s",
            report.status.as_str(),
            report.succeeded + report.skipped,
            report.units(),
            start.elapsed().as_secs_f32()
        );
        Ok(report)
    }

    /// 视频整体和所有已知关键帧是否都有当前模型版本的记录
    async fn video_is_current(&self, media_id: i64) -> Result<bool> {
        let keyframes = self.library.keyframes(media_id).await?;
        if keyframes.is_empty() {
            return Ok(false);
        }
        let targets = std::iter::once(Target::Media(media_id))
            .chain(keyframes.iter().map(|kf| Target::Keyframe(kf.id)));
        for target in targets {
            if !self.is_current(target).await?.0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 返回 (目标是否已有当前模型版本的记录, 当前记录 ID)
    async fn is_current(&self, target: Target) -> Result<(bool, Option<i64>)> {
        let current = self.library.get_current(target).await?;
        let fresh = current.as_ref().is_some_and(|r| r.model_version == self.config.model_version);
        Ok((fresh, current.map(|r| r.id)))
    }

    /// 抽取关键帧并与数据库同步，返回视频整体和每个关键帧的单元
    async fn video_jobs(&self, path: &Path, media: &MediaItem, data: Vec<u8>) -> Result<Vec<Job>> {
        let shown = path.display().to_string();
        let start = Instant::now();
        let frames = self
            .call_model(|| self.extractor.extract(path, &data, self.config.extract))
            .await
            .map_err(|(e, attempts)| Error::ingestion(&shown, format!("{e} (after {attempts} attempts)")))?;
        drop(data);
        if frames.is_empty() {
            return Err(Error::ingestion(&shown, "no extractable frames"));
        }
        debug!("{shown}: 抽取 {} 个关键帧, 耗时 {:.2}s", frames.len(), start.elapsed().as_secs_f32());
        self.write_preview(media, &frames[frames.len() / 2].data).await;

        let hashes = frames
            .iter()
            .map(|frame| (frame.timestamp_ms, ContentHash::of(&frame.data).to_string()))
            .collect::<Vec<_>>();
        let keyframes = self.library.sync_keyframes(media.id, &hashes).await?;

        let frames = Arc::new(frames);
        let mut jobs = vec![Job {
            unit: Unit::Whole,
            target: Target::Media(media.id),
            input: Input::Video(frames.clone()),
        }];
        for kf in keyframes {
            let Some(frame) = frames.get(kf.ordinal as usize) else {
                return Err(Error::StoreConsistency(format!(
                    "keyframe #{} of media {} has no extracted frame",
                    kf.ordinal, media.id
                )));
            };
            jobs.push(Job {
                unit: Unit::Keyframe { ordinal: kf.ordinal, timestamp_ms: kf.timestamp_ms },
                target: Target::Keyframe(kf.id),
                input: Input::Image(Arc::new(frame.data.clone())),
            });
        }
        Ok(jobs)
    }

    /// 预览图缺失时写入，失败只记录日志，不影响入库
    async fn write_preview(&self, media: &MediaItem, data: &[u8]) {
        if self.library.preview(media).await.is_some() {
            return;
        }
        match self.library.save_preview(media, data).await {
            Ok(path) => debug!("写入预览图 {}", path.display()),
            Err(e) => warn!("{} 的预览图写入失败: {e}", media.hash),
        }
    }

    async fn run_unit(&self, media_id: i64, job: Job) -> Outcome {
        let fail = |stage, attempts, error: String| {
            Outcome::Failed(UnitFailure { unit: job.unit, stage, attempts, error })
        };

        let current = match self.is_current(job.target).await {
            Ok((true, _)) => return Outcome::Skipped,
            Ok((false, current)) => current,
            Err(e) => return fail(Stage::Commit, 1, e.to_string()),
        };

        let described = match &job.input {
            Input::Image(data) => self.call_model(|| self.descriptor.describe(data)).await,
            Input::Video(frames) => self.call_model(|| self.descriptor.describe_video(frames)).await,
        };
        let caption = match described {
            Ok(caption) => caption,
            Err((e, attempts)) => return fail(Stage::Describe, attempts, e.to_string()),
        };

        let (embedder, text) = (&self.embedder, caption.text.as_str());
        let embedded = self
            .call_model(|| async move {
                let vector = embedder.embed(text).await?;
                if vector.len() != embedder.dim() {
                    return Err(ModelError::InvalidOutput(format!(
                        "expected {} dimensions, got {}",
                        embedder.dim(),
                        vector.len()
                    )));
                }
                Ok(vector)
            })
            .await;
        let embedding = match embedded {
            Ok(vector) => vector,
            Err((e, attempts)) => return fail(Stage::Embed, attempts, e.to_string()),
        };

        let record = NewRecord {
            media_id,
            target: job.target,
            caption: caption.text,
            score: caption.score,
            model_version: self.config.model_version.clone(),
            embedding,
        };
        // 提交放在独立的任务中，入库被取消时正在进行的提交仍会完成
        let library = self.library.clone();
        let committed = tokio::spawn(async move {
            match current {
                Some(old) => library.supersede(old, record).await,
                None => library.put(record).await,
            }
        })
        .await;
        match committed {
            Ok(Ok(record)) => {
                debug!("{} -> 记录 {}", job.target, record.id);
                Outcome::Committed
            }
            Ok(Err(e)) => fail(Stage::Commit, 1, e.to_string()),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => fail(Stage::Commit, 1, Error::Cancelled.to_string()),
        }
    }

    /// 调用模型，超时或失败时重试，全部失败时返回最后一次的错误和尝试次数
    async fn call_model<T, F, Fut>(&self, mut call: F) -> Result<T, (ModelError, usize)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.config.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout(self.config.timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempts <= self.config.retry_limit => {
                    debug!("第 {attempts} 次调用失败，重试: {e}");
                }
                Err(e) => return Err((e, attempts)),
            }
        }
    }
}
