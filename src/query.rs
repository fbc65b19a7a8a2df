use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, ModelError, Result};
use crate::index::Hit;
use crate::library::MediaLibrary;
use crate::media::*;
use crate::metrics;
use crate::models::Embedder;

/// 搜索范围
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Images,
    Videos,
    #[default]
    All,
}

impl Scope {
    pub fn matches(&self, kind: MediaKind) -> bool {
        match self {
            Self::Images => kind == MediaKind::Image,
            Self::Videos => kind == MediaKind::Video,
            Self::All => true,
        }
    }
}

/// 视频整体描述与最佳关键帧得分相同时的取舍
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// 使用视频整体描述
    #[default]
    Video,
    /// 使用关键帧
    Keyframe,
}

/// 结果的来源：产生最终分数的那条描述记录
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Provenance {
    pub record_id: i64,
    pub target: TargetKind,
    /// 关键帧序号，整体描述时为空
    pub ordinal: Option<i64>,
    /// 关键帧时间，毫秒
    pub timestamp_ms: Option<i64>,
    pub caption: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchResult {
    pub media_id: i64,
    pub kind: MediaKind,
    pub path: String,
    pub score: f32,
    pub provenance: Provenance,
}

/// 视频的综合描述：整体描述加上按时间排列的关键帧描述
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VideoAggregate {
    pub caption: Option<String>,
    /// (时间戳毫秒, 描述)
    pub scenes: Vec<(i64, String)>,
    pub summary: String,
}

/// 综合描述缓存的失效键：(整体记录 ID, 关键帧记录 ID 列表)
type AggregateKey = (Option<i64>, Vec<i64>);

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub fanout: usize,
    pub tie_break: TieBreak,
    pub timeout: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { fanout: 3, tie_break: TieBreak::Video, timeout: Duration::from_secs(60) }
    }
}

pub struct QueryEngine<E> {
    library: Arc<MediaLibrary>,
    embedder: Arc<E>,
    options: QueryOptions,
    aggregates: AggregateCache,
}

impl<E: Embedder> QueryEngine<E> {
    pub fn new(library: Arc<MediaLibrary>, embedder: Arc<E>, options: QueryOptions) -> Self {
        Self { library, embedder, options, aggregates: AggregateCache::new() }
    }

    pub fn library(&self) -> &Arc<MediaLibrary> {
        &self.library
    }

    /// 使用自然语言搜索媒体，返回按分数降序排列的至多 k 个结果
    pub async fn search(&self, query: &str, k: i64, scope: Scope) -> Result<Vec<SearchResult>> {
        if k <= 0 {
            return Err(Error::InvalidArgument(format!("k must be positive, got {k}")));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidArgument("query text is empty".into()));
        }
        let k = k as usize;
        let start = Instant::now();

        let vector = tokio::time::timeout(self.options.timeout, self.embedder.embed(query))
            .await
            .map_err(|_| ModelError::Timeout(self.options.timeout))??;

        let fanout = k.saturating_mul(self.options.fanout.max(1));
        let hits = self
            .library
            .search_index(&vector, fanout, |meta| scope.matches(meta.media_kind))
            .await?;
        debug!("索引返回 {} 条结果", hits.len());

        let results = aggregate(hits, k, self.options.tie_break);

        metrics::observe_search(scope, start.elapsed().as_secs_f64(), results.len());
        debug!("search time: {:.2}ms", start.elapsed().as_secs_f64() * 1000.);
        Ok(results)
    }

    /// 视频的综合描述，媒体项不存在或不是视频时返回 None
    pub async fn video_aggregate(&self, media_id: i64) -> Result<Option<Arc<VideoAggregate>>> {
        self.aggregates.get(&self.library, media_id).await
    }
}

/// 视频综合描述的缓存
///
/// 缓存以视频整体记录和关键帧记录的 ID 为键，任何一条记录被替换后自动失效。
#[derive(Default)]
pub struct AggregateCache {
    entries: Mutex<HashMap<i64, (AggregateKey, Arc<VideoAggregate>)>>,
}

impl AggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, library: &MediaLibrary, media_id: i64) -> Result<Option<Arc<VideoAggregate>>> {
        match library.media(media_id).await? {
            Some(item) if item.kind == MediaKind::Video => {}
            _ => return Ok(None),
        }
        let records = library.media_records(media_id, true).await?;
        let keyframes = library.keyframes(media_id).await?;

        let whole = records.iter().find(|r| matches!(r.target, Target::Media(_)));
        let mut scenes = records
            .iter()
            .filter_map(|r| match r.target {
                Target::Keyframe(id) => keyframes.iter().find(|kf| kf.id == id).map(|kf| (kf.timestamp_ms, r)),
                Target::Media(_) => None,
            })
            .collect::<Vec<_>>();
        scenes.sort_by_key(|(ts, r)| (*ts, r.id));

        let key: AggregateKey = (whole.map(|r| r.id), scenes.iter().map(|(_, r)| r.id).collect());
        if let Some((cached_key, cached)) =
            self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(&media_id)
        {
            if *cached_key == key {
                return Ok(Some(cached.clone()));
            }
        }

        let aggregate = Arc::new(build_aggregate(
            whole.map(|r| r.caption.clone()),
            scenes.into_iter().map(|(ts, r)| (ts, r.caption.clone())).collect(),
        ));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(media_id, (key, aggregate.clone()));
        Ok(Some(aggregate))
    }
}

/// 将记录级别的命中合并为媒体级别的结果
///
/// 视频的分数取整体描述与所有关键帧中的最大值，并记录产生该分数的来源。
pub fn aggregate(hits: Vec<Hit>, k: usize, tie_break: TieBreak) -> Vec<SearchResult> {
    let mut best: HashMap<i64, Hit> = HashMap::new();
    for hit in hits {
        match best.get(&hit.meta.media_id) {
            Some(current) if !prefer(&hit, current, tie_break) => {}
            _ => {
                best.insert(hit.meta.media_id, hit);
            }
        }
    }

    let mut winners = best.into_values().collect::<Vec<_>>();
    winners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.meta.created_at.cmp(&a.meta.created_at))
            .then_with(|| a.meta.media_id.cmp(&b.meta.media_id))
    });
    winners.truncate(k);

    winners
        .into_iter()
        .map(|hit| SearchResult {
            media_id: hit.meta.media_id,
            kind: hit.meta.media_kind,
            path: hit.meta.path,
            score: hit.score,
            provenance: Provenance {
                record_id: hit.record_id,
                target: hit.meta.target.kind(),
                ordinal: hit.meta.ordinal,
                timestamp_ms: hit.meta.timestamp_ms,
                caption: hit.meta.caption,
            },
        })
        .collect()
}

/// `candidate` 是否应当取代 `current` 成为该媒体项的来源
fn prefer(candidate: &Hit, current: &Hit, tie_break: TieBreak) -> bool {
    if candidate.score != current.score {
        return candidate.score > current.score;
    }
    let (cand_kind, cur_kind) = (candidate.meta.target.kind(), current.meta.target.kind());
    match (tie_break, cand_kind, cur_kind) {
        (TieBreak::Video, TargetKind::Media, TargetKind::Keyframe) => true,
        (TieBreak::Keyframe, TargetKind::Keyframe, TargetKind::Media) => true,
        _ => false,
    }
}

fn build_aggregate(caption: Option<String>, scenes: Vec<(i64, String)>) -> VideoAggregate {
    let mut parts = vec![];
    if let Some(caption) = &caption {
        parts.push(caption.clone());
    }
    let mut last: Option<&str> = None;
    for (ts, text) in &scenes {
        // 相邻的重复描述只保留第一条
        if last == Some(text.as_str()) {
            continue;
        }
        parts.push(format!("[{}] {}", format_timestamp(*ts), text));
        last = Some(text);
    }
    VideoAggregate { caption, scenes, summary: parts.join("\n") }
}

/// 格式化为 `mm:ss.mmm`，超过一小时时为 `hh:mm:ss.mmm`
pub fn format_timestamp(ms: i64) -> String {
    let (h, m, s, ms) = (ms / 3_600_000, ms / 60_000 % 60, ms / 1000 % 60, ms % 1000);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}.{ms:03}")
    } else {
        format!("{m:02}:{s:02}.{ms:03}")
    }
}
