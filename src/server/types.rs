use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::media::{Keyframe, MediaItem};
use crate::query::{Scope, SearchResult, VideoAggregate};

/// 搜索请求参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// 查询文本
    pub query: String,
    /// 返回的结果数量，默认使用服务启动时的配置
    pub k: Option<i64>,
    /// 搜索范围
    pub scope: Option<Scope>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    pub result: Vec<SearchResult>,
}

/// 入库请求参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestRequest {
    /// 服务器本地的文件路径
    pub path: String,
}

/// 一条描述记录
#[derive(Debug, Serialize, ToSchema)]
pub struct RecordView {
    pub id: i64,
    /// 关键帧 ID，整体描述时为空
    pub keyframe_id: Option<i64>,
    pub caption: String,
    pub score: f32,
    pub model_version: String,
    pub created_at: i64,
}

/// 媒体项详情
#[derive(Debug, Serialize, ToSchema)]
pub struct MediaResponse {
    pub media: MediaItem,
    pub keyframes: Vec<Keyframe>,
    /// current 记录
    pub records: Vec<RecordView>,
    /// 视频的综合描述
    pub aggregate: Option<VideoAggregate>,
    /// 预览图地址，尚未生成时为空
    pub preview: Option<String>,
}

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
