use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::ValueEnum;
use log::{debug, info, warn};
use serde::Serialize;
use sqlx::SqliteConnection;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::ConfDir;
use crate::db::{self, Database, crud};
use crate::error::{Error, Result};
use crate::index::*;
use crate::media::*;

/// 被替换的旧记录如何处理
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// 保留旧记录，便于排查模型版本变化带来的差异
    #[default]
    Keep,
    /// 直接删除旧记录
    Purge,
}

/// 媒体库的统计信息
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LibraryStats {
    pub images: i64,
    pub videos: i64,
    pub current_records: i64,
    pub superseded_records: i64,
    pub index_entries: usize,
}

pub struct MediaLibraryBuilder {
    conf_dir: ConfDir,
    metric: Metric,
    retention: Retention,
}

impl MediaLibraryBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir, metric: Metric::default(), retention: Retention::default() }
    }

    /// 设置相似度度量
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// 设置旧记录的保留策略
    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub async fn open(self) -> Result<MediaLibrary> {
        std::fs::create_dir_all(self.conf_dir.path())?;
        let db = db::init_db(self.conf_dir.database()).await?;
        let index = load_index(&db, self.metric).await?;
        let previews = self.conf_dir.previews();
        std::fs::create_dir_all(&previews)?;
        Ok(MediaLibrary { db, index: RwLock::new(index), retention: self.retention, previews })
    }
}

/// 从数据库中的 current 记录重建索引
///
/// 数据库是唯一的持久化来源，索引只存在于内存中，
/// 因此崩溃后重启时 current 记录总会被重新索引。
async fn load_index(db: &Database, metric: Metric) -> Result<FlatIndex> {
    let start = Instant::now();
    let mut index = FlatIndex::new(metric);
    for row in crud::get_indexed_records(db).await? {
        let media_kind: MediaKind = row.media_kind.parse().map_err(Error::StoreConsistency)?;
        let path = row.media_path;
        let (ordinal, timestamp_ms) = (row.ordinal, row.timestamp_ms);
        let record = DescriptiveRecord::try_from(row.record)?;
        if matches!(record.target, Target::Keyframe(_)) && ordinal.is_none() {
            return Err(Error::StoreConsistency(format!(
                "record {} points to missing {}",
                record.id, record.target
            )));
        }
        index.insert(IndexEntry {
            record_id: record.id,
            meta: EntryMeta {
                media_id: record.media_id,
                media_kind,
                path,
                target: record.target,
                ordinal,
                timestamp_ms,
                caption: record.caption,
                created_at: record.created_at,
            },
            vector: record.embedding,
        })?;
    }
    info!("加载索引完成: {} 条, 耗时 {:.2}s", index.len(), start.elapsed().as_secs_f32());
    Ok(index)
}

/// 媒体库：持久化的描述记录以及与之同步的向量索引
///
/// 所有写操作都在索引写锁内完成数据库事务，提交后立即更新索引，
/// 因此持有读锁的查询不会看到只写了一半的状态。
pub struct MediaLibrary {
    db: Database,
    index: RwLock<FlatIndex>,
    retention: Retention,
    previews: PathBuf,
}

impl MediaLibrary {
    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn index_dim(&self) -> Option<usize> {
        self.index.read().await.dim()
    }

    pub async fn media_by_hash(&self, hash: &ContentHash) -> Result<Option<MediaItem>> {
        crud::find_media_by_hash(&self.db, hash.as_str()).await?.map(TryInto::try_into).transpose()
    }

    pub async fn media(&self, id: i64) -> Result<Option<MediaItem>> {
        crud::get_media(&self.db, id).await?.map(TryInto::try_into).transpose()
    }

    /// 添加媒体项，已存在时返回已有的记录
    pub async fn add_media(
        &self,
        hash: &ContentHash,
        kind: MediaKind,
        path: &str,
        size: i64,
    ) -> Result<(MediaItem, bool)> {
        if let Some(item) = self.media_by_hash(hash).await? {
            return Ok((item, false));
        }
        // 所有写入都在索引写锁内串行执行，避免 SQLite 写事务之间互相冲突
        let _guard = self.index.write().await;
        if let Some(item) = self.media_by_hash(hash).await? {
            return Ok((item, false));
        }
        let id = crud::add_media(&self.db, hash.as_str(), kind.as_str(), path, size, now_millis()).await?;
        let item = self
            .media(id)
            .await?
            .ok_or_else(|| Error::StoreConsistency(format!("media {id} vanished after insert")))?;
        Ok((item, true))
    }

    pub async fn keyframes(&self, media_id: i64) -> Result<Vec<Keyframe>> {
        Ok(crud::get_keyframes(&self.db, media_id).await?.into_iter().map(Into::into).collect())
    }

    /// 使视频的关键帧与新抽取的结果一致
    ///
    /// `frames` 为按序号排列的 (时间戳, 帧哈希)。序号相同且哈希相同的关键帧保留，
    /// 其余旧关键帧连同它们的描述记录一起删除。
    pub async fn sync_keyframes(&self, media_id: i64, frames: &[(i64, String)]) -> Result<Vec<Keyframe>> {
        let mut index = self.index.write().await;
        let mut tx = self.db.begin().await?;

        let existing = crud::get_keyframes(&mut *tx, media_id).await?;
        let mut unindexed = vec![];
        let mut kept = HashSet::new();
        for kf in existing {
            let same = frames
                .get(kf.ordinal as usize)
                .is_some_and(|(ts, hash)| *ts == kf.timestamp_ms && *hash == kf.hash);
            if same {
                kept.insert(kf.ordinal);
                continue;
            }
            debug!("关键帧 {} (#{}) 已变化，删除旧记录", kf.id, kf.ordinal);
            unindexed.extend(crud::delete_target_records(&mut *tx, TargetKind::Keyframe, kf.id).await?);
            crud::delete_keyframe(&mut *tx, kf.id).await?;
        }
        for (ordinal, (ts, hash)) in frames.iter().enumerate() {
            if !kept.contains(&(ordinal as i64)) {
                crud::add_keyframe(&mut *tx, media_id, ordinal as i64, *ts, hash).await?;
            }
        }
        let keyframes = crud::get_keyframes(&mut *tx, media_id).await?;
        tx.commit().await?;

        for id in unindexed {
            index.remove(id);
        }
        Ok(keyframes.into_iter().map(Into::into).collect())
    }

    /// 获取目标的 current 记录
    pub async fn get_current(&self, target: Target) -> Result<Option<DescriptiveRecord>> {
        crud::get_current_record(&self.db, target.kind(), target.id())
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    pub async fn record(&self, id: i64) -> Result<Option<DescriptiveRecord>> {
        crud::get_record(&self.db, id).await?.map(TryInto::try_into).transpose()
    }

    /// 媒体项的描述记录，`current_only` 为 false 时包含已被替换的记录
    pub async fn media_records(&self, media_id: i64, current_only: bool) -> Result<Vec<DescriptiveRecord>> {
        crud::get_media_records(&self.db, media_id, current_only)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    /// 为没有 current 记录的目标写入第一条记录
    pub async fn put(&self, record: NewRecord) -> Result<DescriptiveRecord> {
        self.swap_current(None, record).await
    }

    /// 原子地用 `record` 替换 `old_id`
    ///
    /// 如果目标当前的记录已经不是 `old_id`（被其他写入抢先），本次写入被丢弃并返回冲突。
    pub async fn supersede(&self, old_id: i64, record: NewRecord) -> Result<DescriptiveRecord> {
        self.swap_current(Some(old_id), record).await
    }

    async fn swap_current(&self, expected: Option<i64>, record: NewRecord) -> Result<DescriptiveRecord> {
        let mut index = self.index.write().await;
        index.check_dim(record.embedding.len())?;

        let mut tx = self.db.begin().await?;
        let current = crud::get_current_record(&mut *tx, record.target.kind(), record.target.id()).await?;
        let found = current.as_ref().map(|r| r.id);
        if found != expected {
            return Err(Error::SupersedeConflict { target: record.target, expected, found });
        }

        let now = now_millis();
        if let Some(old) = found {
            match self.retention {
                Retention::Keep => crud::set_superseded(&mut *tx, old, now).await?,
                Retention::Purge => crud::delete_record(&mut *tx, old).await?,
            };
        }
        let id = crud::add_record(&mut *tx, &record, now).await?;
        let row = crud::get_record(&mut *tx, id)
            .await?
            .ok_or_else(|| Error::StoreConsistency(format!("record {id} vanished after insert")))?;
        let stored = DescriptiveRecord::try_from(row)?;
        let meta = entry_meta(&mut *tx, &stored).await?;
        tx.commit().await?;

        if let Some(old) = found {
            if index.remove(old).is_none() {
                warn!("被替换的记录 {old} 不在索引中");
            }
        }
        index.insert(IndexEntry { record_id: stored.id, vector: stored.embedding.clone(), meta })?;
        debug!("{} 的 current 记录: {:?} -> {}", stored.target, found, stored.id);
        Ok(stored)
    }

    /// 预览图的存放位置，文件名由内容哈希决定
    ///
    /// 图片沿用原文件的后缀，视频的预览是一张 jpg 关键帧
    pub fn preview_path(&self, media: &MediaItem) -> PathBuf {
        let ext = match media.kind {
            MediaKind::Image => Path::new(&media.path)
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_else(|| "img".to_owned()),
            MediaKind::Video => "jpg".to_owned(),
        };
        self.previews.join(format!("{}.{ext}", media.hash))
    }

    /// 已生成的预览图
    pub async fn preview(&self, media: &MediaItem) -> Option<PathBuf> {
        let path = self.preview_path(media);
        tokio::fs::try_exists(&path).await.unwrap_or(false).then_some(path)
    }

    /// 写入预览图，先写临时文件再重命名，读者不会看到写了一半的文件
    pub async fn save_preview(&self, media: &MediaItem, data: &[u8]) -> Result<PathBuf> {
        let path = self.preview_path(media);
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// 删除媒体项以及它的关键帧、描述记录、索引条目和预览图
    pub async fn delete_cascade(&self, media_id: i64) -> Result<bool> {
        let media = self.media(media_id).await?;
        let mut index = self.index.write().await;
        let mut tx = self.db.begin().await?;
        let current = crud::get_media_records(&mut *tx, media_id, true).await?;
        let deleted = crud::delete_media(&mut *tx, media_id).await?;
        tx.commit().await?;

        for record in &current {
            index.remove(record.id);
        }
        if let Some(media) = &media {
            match tokio::fs::remove_file(self.preview_path(media)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("删除 {} 的预览图失败: {e}", media.hash),
            }
        }
        info!("删除媒体项 {media_id}: {} 条 current 记录", current.len());
        Ok(deleted > 0)
    }

    /// 在索引中搜索
    pub async fn search_index<F>(&self, vector: &[f32], k: usize, filter: F) -> Result<Vec<Hit>>
    where
        F: Fn(&EntryMeta) -> bool + Sync,
    {
        self.index.read().await.query_filtered(vector, k, filter)
    }

    /// 检查 current 记录与索引条目是否一一对应，不一致时返回 StoreConsistency 错误
    pub async fn check_consistency(&self) -> Result<usize> {
        let index = self.index.read().await;
        let current = crud::get_indexed_records(&self.db).await?;
        let current_ids: HashSet<i64> = current.iter().map(|r| r.record.id).collect();
        let indexed: HashSet<i64> = index.record_ids().into_iter().collect();

        let mut problems = vec![];
        let missing: Vec<_> = current_ids.difference(&indexed).collect();
        if !missing.is_empty() {
            problems.push(format!("current records without index entry: {missing:?}"));
        }
        let stale: Vec<_> = indexed.difference(&current_ids).collect();
        if !stale.is_empty() {
            problems.push(format!("index entries without current record: {stale:?}"));
        }
        let orphans = crud::get_orphan_records(&self.db).await?;
        if !orphans.is_empty() {
            problems.push(format!("records pointing to missing keyframes: {orphans:?}"));
        }

        if problems.is_empty() {
            Ok(current_ids.len())
        } else {
            Err(Error::StoreConsistency(problems.join("; ")))
        }
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        let (images, videos) = crud::count_media(&self.db).await?;
        let (current_records, superseded_records) = crud::count_records(&self.db).await?;
        let index_entries = self.index.read().await.len();
        Ok(LibraryStats { images, videos, current_records, superseded_records, index_entries })
    }

    /// 关闭数据库连接
    pub async fn close(&self) {
        self.db.close().await;
    }
}

/// 构造记录对应的索引条目信息
async fn entry_meta(conn: &mut SqliteConnection, record: &DescriptiveRecord) -> Result<EntryMeta> {
    let media: MediaItem = crud::get_media(&mut *conn, record.media_id)
        .await?
        .ok_or_else(|| Error::StoreConsistency(format!("media {} not found", record.media_id)))?
        .try_into()?;
    let (ordinal, timestamp_ms) = match record.target {
        Target::Media(_) => (None, None),
        Target::Keyframe(id) => {
            let kf = crud::get_keyframes(&mut *conn, record.media_id)
                .await?
                .into_iter()
                .find(|kf| kf.id == id)
                .ok_or_else(|| Error::StoreConsistency(format!("keyframe {id} not found")))?;
            (Some(kf.ordinal), Some(kf.timestamp_ms))
        }
    };
    Ok(EntryMeta {
        media_id: media.id,
        media_kind: media.kind,
        path: media.path,
        target: record.target,
        ordinal,
        timestamp_ms,
        caption: record.caption.clone(),
        created_at: record.created_at,
    })
}

/// 使用默认参数打开指定目录下的媒体库
pub async fn open_at(path: impl AsRef<Path>) -> Result<MediaLibrary> {
    MediaLibraryBuilder::new(ConfDir::new(path.as_ref())).open().await
}
