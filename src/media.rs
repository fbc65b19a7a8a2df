use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            _ => Err(format!("unknown media kind: {s}")),
        }
    }
}

/// 描述记录的目标：整个媒体项，或者视频中的某个关键帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Target {
    Media(i64),
    Keyframe(i64),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Media(_) => TargetKind::Media,
            Self::Keyframe(_) => TargetKind::Keyframe,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Media(id) | Self::Keyframe(id) => *id,
        }
    }

    pub fn from_parts(kind: TargetKind, id: i64) -> Self {
        match kind {
            TargetKind::Media => Self::Media(id),
            TargetKind::Keyframe => Self::Keyframe(id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Media(id) => write!(f, "media#{id}"),
            Self::Keyframe(id) => write!(f, "keyframe#{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Media,
    Keyframe,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Keyframe => "keyframe",
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media" => Ok(Self::Media),
            "keyframe" => Ok(Self::Keyframe),
            _ => Err(format!("unknown target kind: {s}")),
        }
    }
}

/// 文件内容哈希，作为媒体项的唯一标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(format!("invalid content hash: {s}"))
        }
    }
}

/// 已入库的媒体项，创建后不可变
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MediaItem {
    pub id: i64,
    #[schema(value_type = String)]
    pub hash: ContentHash,
    pub kind: MediaKind,
    pub path: String,
    pub size: i64,
    /// 入库时间，毫秒时间戳
    pub ingested_at: i64,
}

/// 视频关键帧，只保存父媒体项的 ID
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Keyframe {
    pub id: i64,
    pub media_id: i64,
    pub ordinal: i64,
    /// 相对视频开头的偏移，毫秒
    pub timestamp_ms: i64,
    pub hash: String,
}

/// 一条描述记录，同一个目标任意时刻只有一条 current 记录
#[derive(Debug, Clone, Serialize)]
pub struct DescriptiveRecord {
    pub id: i64,
    pub media_id: i64,
    pub target: Target,
    pub caption: String,
    pub score: f32,
    pub model_version: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: i64,
    pub current: bool,
    pub superseded_at: Option<i64>,
}

/// 尚未写入的描述记录
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub media_id: i64,
    pub target: Target,
    pub caption: String,
    pub score: f32,
    pub model_version: String,
    pub embedding: Vec<f32>,
}

/// 根据后缀名判断媒体类型
pub struct KindMatcher {
    image: regex::Regex,
    video: regex::Regex,
}

impl KindMatcher {
    /// `image` 和 `video` 为逗号分隔的后缀名列表
    pub fn new(image: &str, video: &str) -> Result<Self, regex::Error> {
        let build = |s: &str| regex::Regex::new(&format!("(?i)^({})$", s.replace(',', "|")));
        Ok(Self { image: build(image)?, video: build(video)? })
    }

    pub fn kind_of(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_string_lossy();
        if self.image.is_match(&ext) {
            Some(MediaKind::Image)
        } else if self.video.is_match(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
