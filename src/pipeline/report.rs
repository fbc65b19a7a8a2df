use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

use crate::media::MediaItem;
use crate::query::format_timestamp;

/// 需要单独描述的单元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Unit {
    /// 图片本身，或视频整体
    Whole,
    Keyframe { ordinal: i64, timestamp_ms: i64 },
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => write!(f, "whole"),
            Self::Keyframe { ordinal, timestamp_ms } => {
                write!(f, "keyframe #{ordinal} @ {}", format_timestamp(*timestamp_ms))
            }
        }
    }
}

/// 单元失败时所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Describe,
    Embed,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Embed => "embed",
            Self::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnitFailure {
    #[schema(value_type = Object)]
    pub unit: Unit,
    pub stage: Stage,
    /// 包括第一次在内的尝试次数
    pub attempts: usize,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    /// 所有单元都已写入
    Complete,
    /// 部分单元失败，其余单元可被搜索
    Partial,
    /// 所有单元在当前模型版本下都已有记录
    Skipped,
    /// 没有任何单元成功
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// 单个媒体项的入库结果
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestReport {
    pub media: MediaItem,
    pub status: IngestStatus,
    /// 本次新写入记录的单元数量
    pub succeeded: usize,
    /// 已有 current 记录而跳过的单元数量
    pub skipped: usize,
    pub failures: Vec<UnitFailure>,
}

impl IngestReport {
    pub fn new(media: MediaItem, succeeded: usize, skipped: usize, failures: Vec<UnitFailure>) -> Self {
        let status = match (succeeded, skipped, failures.is_empty()) {
            (0, _, true) => IngestStatus::Skipped,
            (_, _, true) => IngestStatus::Complete,
            (0, 0, false) => IngestStatus::Failed,
            _ => IngestStatus::Partial,
        };
        Self { media, status, succeeded, skipped, failures }
    }

    /// 单元总数
    pub fn units(&self) -> usize {
        self.succeeded + self.skipped + self.failures.len()
    }
}
