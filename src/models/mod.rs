//! 外部模型的能力接口：描述、抽帧、向量化
//!
//! 核心逻辑只依赖这三个 trait，测试时可以替换为确定性的实现。

mod command;
mod ffmpeg;
mod hash;

use std::future::Future;
use std::path::Path;

pub use command::*;
pub use ffmpeg::*;
pub use hash::*;

use crate::error::ModelError;

/// 模型生成的描述
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub text: String,
    pub score: f32,
}

/// 视频中采样出的一帧
#[derive(Debug, Clone)]
pub struct Frame {
    /// 相对视频开头的偏移，毫秒
    pub timestamp_ms: i64,
    /// 编码后的图片数据
    pub data: Vec<u8>,
}

/// 抽帧参数
#[derive(Debug, Clone, Copy)]
pub struct ExtractConfig {
    /// 场景切换阈值，范围 0 ~ 1，越小越敏感
    pub threshold: f32,
    /// 单个视频最多保留的关键帧数量
    pub max_keyframes: usize,
}

pub trait MediaDescriptor: Send + Sync + 'static {
    /// 为一张图片（或一帧）生成描述
    fn describe(&self, image: &[u8]) -> impl Future<Output = Result<Caption, ModelError>> + Send;

    /// 为整个视频生成描述，默认使用中间的关键帧作为封面
    fn describe_video(
        &self,
        frames: &[Frame],
    ) -> impl Future<Output = Result<Caption, ModelError>> + Send {
        async move {
            match frames.get(frames.len() / 2) {
                Some(frame) => self.describe(&frame.data).await,
                None => Err(ModelError::InvalidOutput("video has no frames".into())),
            }
        }
    }
}

pub trait KeyframeExtractor: Send + Sync + 'static {
    /// 抽取关键帧，结果按时间排序，同样的输入和参数必须得到同样的结果
    fn extract(
        &self,
        path: &Path,
        video: &[u8],
        config: ExtractConfig,
    ) -> impl Future<Output = Result<Vec<Frame>, ModelError>> + Send;
}

pub trait Embedder: Send + Sync + 'static {
    /// 向量维数
    fn dim(&self) -> usize;

    /// 将文本转换为定长向量
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, ModelError>> + Send;
}

/// 命令行可选的向量化后端
pub enum Embedders {
    Hash(HashEmbedder),
    Command(CommandEmbedder),
}

impl Embedders {
    /// `spec` 为 `hash` 时使用内置的哈希向量化，否则视为外部命令
    pub fn from_spec(spec: &str, dim: usize) -> Result<Self, ModelError> {
        match spec {
            "hash" => Ok(Self::Hash(HashEmbedder::new(dim))),
            _ => Ok(Self::Command(CommandEmbedder::new(CommandLine::parse(spec)?, dim))),
        }
    }
}

impl Embedder for Embedders {
    fn dim(&self) -> usize {
        match self {
            Self::Hash(e) => e.dim(),
            Self::Command(e) => e.dim(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        match self {
            Self::Hash(e) => e.embed(text).await,
            Self::Command(e) => e.embed(text).await,
        }
    }
}
