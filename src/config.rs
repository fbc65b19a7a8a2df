use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::index::Metric;
use crate::library::Retention;
use crate::query::{Scope, TieBreak};

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "mediakb", "mediakb")
        .map(|dirs| dirs.config_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| ".mediakb".to_owned())
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// 写入描述记录的模型版本标签，版本变化时会重新生成描述
    #[arg(long, value_name = "TAG", default_value = "default")]
    pub model_version: String,
    /// 生成描述的外部命令，从 stdin 读取图片，输出描述文本或 JSON
    #[arg(long, value_name = "COMMAND")]
    pub descriptor: Option<String>,
    /// 向量化方式：`hash` 使用内置的哈希向量化，否则视为外部命令
    #[arg(long, value_name = "COMMAND", default_value = "hash")]
    pub embedder: String,
    /// 向量维数
    #[arg(long, value_name = "N", default_value_t = 256)]
    pub embedding_dim: usize,
    /// 单次模型调用的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,
}

impl ModelOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct IngestOptions {
    /// 场景切换阈值，范围 0 ~ 1，越小保留的关键帧越多
    #[arg(long, value_name = "THRESHOLD", default_value_t = 0.3)]
    pub keyframe_threshold: f32,
    /// 单个视频最多保留的关键帧数量
    #[arg(long, value_name = "N", default_value_t = 32)]
    pub max_keyframes: usize,
    /// 同时处理的媒体文件数量，默认为 CPU 核数
    #[arg(short = 'j', long, value_name = "N", default_value_t = num_cpus::get())]
    pub concurrency: usize,
    /// 单个视频内同时处理的关键帧数量
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub unit_concurrency: usize,
    /// 每个单元描述或向量化失败后的最大重试次数
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub retry_limit: usize,
    /// 被替换的旧描述记录的处理方式
    #[arg(long, value_enum, default_value_t = Retention::Keep)]
    pub retention: Retention,
    /// 图片后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png,bmp,gif,webp")]
    pub image_suffix: String,
    /// 视频后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "mp4,avi,mov,mkv,webm")]
    pub video_suffix: String,
    /// ffmpeg 可执行文件
    #[arg(long, value_name = "PATH", default_value = "ffmpeg")]
    pub ffmpeg: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(short, value_name = "K", default_value_t = 10, allow_negative_numbers = true)]
    pub k: i64,
    /// 搜索范围
    #[arg(long, value_enum, default_value_t = Scope::All)]
    pub scope: Scope,
    /// 从索引中多取的倍数，用于弥补关键帧合并后结果变少
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub fanout: usize,
    /// 相似度度量
    #[arg(long, value_enum, default_value_t = Metric::Cosine)]
    pub metric: Metric,
    /// 视频整体描述与最佳关键帧分数相同时，以哪个作为来源
    #[arg(long, value_enum, default_value_t = TieBreak::Video)]
    pub tie_break: TieBreak,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mediakb", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// mediakb 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录，为图片和视频生成描述并加入索引
    Ingest(IngestCommand),
    /// 使用自然语言搜索媒体
    Search(SearchCommand),
    /// 显示媒体项的关键帧和描述记录
    Show(ShowCommand),
    /// 删除媒体项及其所有记录
    Remove(RemoveCommand),
    /// 检查描述记录与索引是否一致
    Check(CheckCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("mediakb.db")
    }

    /// 返回抽帧临时目录的路径
    pub fn frames(&self) -> PathBuf {
        self.path.join("frames")
    }

    /// 返回预览图目录的路径
    pub fn previews(&self) -> PathBuf {
        self.path.join("previews")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
