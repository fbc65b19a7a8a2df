use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::media::Target;

/// 外部模型（描述、抽帧、向量化）调用失败
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("model call failed: {0}")]
    Failed(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("failed to spawn model process `{program}`: {reason}")]
    Spawn { program: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 参数格式正确，但对应的对象不存在
    #[error("{0} not found")]
    NotFound(String),

    /// 整个媒体项的入库失败：文件不可读、无法抽帧等
    #[error("ingestion of {path} failed: {reason}")]
    Ingestion { path: String, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    /// RecordStore 与 VectorIndex 不一致，必须由人工处理
    #[error("store consistency violated: {0}")]
    StoreConsistency(String),

    #[error("supersede conflict on {target}: expected current record {expected:?}, found {found:?}")]
    SupersedeConflict { target: Target, expected: Option<i64>, found: Option<i64> },

    #[error("backend unavailable: {0}")]
    Backend(Arc<sqlx::Error>),

    #[error("i/o error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl Error {
    pub fn ingestion(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Ingestion { path: path.into(), reason: reason.to_string() }
    }

    /// 进程退出码，用于区分参数错误与后端不可用
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => 2,
            Self::Backend(_) | Self::Io(_) | Self::Model(_) => 3,
            Self::StoreConsistency(_) => 4,
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(Arc::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Backend(Arc::new(err.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
