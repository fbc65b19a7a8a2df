use std::sync::Arc;

use crate::cli::Pipeline;
use crate::config::SearchOptions;
use crate::models::Embedders;
use crate::query::QueryEngine;

/// 应用状态
pub struct AppState {
    /// 查询引擎，同时持有媒体库
    pub engine: QueryEngine<Embedders>,
    /// 入库流程，未配置描述模型时为空
    pub pipeline: Option<Pipeline>,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    pub fn new(
        engine: QueryEngine<Embedders>,
        pipeline: Option<Pipeline>,
        search: SearchOptions,
        token: String,
    ) -> Arc<Self> {
        Arc::new(AppState { engine, pipeline, search, token })
    }
}
