mod flat;

use std::str::FromStr;

use clap::ValueEnum;
use serde::Serialize;

pub use flat::*;

use crate::error::Result;
use crate::media::{MediaKind, Target};

/// 相似度度量
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// 余弦相似度
    #[default]
    Cosine,
    /// 内积，要求向量已经归一化
    Dot,
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            _ => Err(format!("unknown metric: {s}")),
        }
    }
}

/// 索引条目携带的附加信息，搜索时不需要再访问数据库
#[derive(Debug, Clone, Serialize)]
pub struct EntryMeta {
    pub media_id: i64,
    pub media_kind: MediaKind,
    pub path: String,
    pub target: Target,
    /// 关键帧序号，整体描述时为空
    pub ordinal: Option<i64>,
    pub timestamp_ms: Option<i64>,
    pub caption: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub record_id: i64,
    pub vector: Vec<f32>,
    pub meta: EntryMeta,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub record_id: i64,
    pub score: f32,
    pub meta: EntryMeta,
}

pub trait VectorIndex {
    /// 向量维数，空索引且未指定维数时为 None
    fn dim(&self) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, record_id: i64) -> bool;

    /// 插入一个条目，同一个 record_id 只能存在一次
    fn insert(&mut self, entry: IndexEntry) -> Result<()>;

    /// 删除条目，不存在时返回 None
    fn remove(&mut self, record_id: i64) -> Option<IndexEntry>;

    /// 返回满足 `filter` 的前 k 个条目，按相似度降序，相同时较新的在前
    fn query_filtered<F>(&self, vector: &[f32], k: usize, filter: F) -> Result<Vec<Hit>>
    where
        F: Fn(&EntryMeta) -> bool + Sync;

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.query_filtered(vector, k, |_| true)
    }

    /// 所有条目的 record_id
    fn record_ids(&self) -> Vec<i64>;
}
