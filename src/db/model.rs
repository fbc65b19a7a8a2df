use sqlx::FromRow;

use crate::error::{Error, Result};
use crate::media::*;

/// 媒体项记录
#[derive(Debug, FromRow)]
pub struct MediaRow {
    pub id: i64,
    /// blake3 哈希的十六进制表示
    pub hash: String,
    pub kind: String,
    pub path: String,
    pub size: i64,
    pub ingested_at: i64,
}

/// 关键帧记录
#[derive(Debug, FromRow)]
pub struct KeyframeRow {
    pub id: i64,
    pub media_id: i64,
    pub ordinal: i64,
    pub timestamp_ms: i64,
    pub hash: String,
}

/// 描述记录
#[derive(Debug, FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub media_id: i64,
    pub target_kind: String,
    pub target_id: i64,
    pub caption: String,
    pub score: f64,
    pub model_version: String,
    /// f32 向量，按小端字节序存储
    pub embedding: Vec<u8>,
    pub created_at: i64,
    pub current: bool,
    pub superseded_at: Option<i64>,
}

/// 重建索引时使用：current 记录以及它所属媒体项、关键帧的信息
#[derive(Debug, FromRow)]
pub struct IndexedRecordRow {
    #[sqlx(flatten)]
    pub record: RecordRow,
    pub media_kind: String,
    pub media_path: String,
    pub ordinal: Option<i64>,
    pub timestamp_ms: Option<i64>,
}

impl TryFrom<MediaRow> for MediaItem {
    type Error = Error;

    fn try_from(row: MediaRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            hash: row.hash.parse().map_err(Error::StoreConsistency)?,
            kind: row.kind.parse().map_err(Error::StoreConsistency)?,
            path: row.path,
            size: row.size,
            ingested_at: row.ingested_at,
        })
    }
}

impl From<KeyframeRow> for Keyframe {
    fn from(row: KeyframeRow) -> Self {
        Self {
            id: row.id,
            media_id: row.media_id,
            ordinal: row.ordinal,
            timestamp_ms: row.timestamp_ms,
            hash: row.hash,
        }
    }
}

impl TryFrom<RecordRow> for DescriptiveRecord {
    type Error = Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        let kind: TargetKind = row.target_kind.parse().map_err(Error::StoreConsistency)?;
        let embedding = decode_embedding(&row.embedding).ok_or_else(|| {
            Error::StoreConsistency(format!("record {} has a malformed embedding", row.id))
        })?;
        Ok(Self {
            id: row.id,
            media_id: row.media_id,
            target: Target::from_parts(kind, row.target_id),
            caption: row.caption,
            score: row.score as f32,
            model_version: row.model_version,
            embedding,
            created_at: row.created_at,
            current: row.current,
            superseded_at: row.superseded_at,
        })
    }
}

pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// 长度不是 4 的倍数或者为空时返回 None
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % size_of::<f32>() != 0 {
        return None;
    }
    let words: &[[u8; 4]] = bytemuck::cast_slice(bytes);
    Some(words.iter().map(|w| f32::from_le_bytes(*w)).collect())
}
