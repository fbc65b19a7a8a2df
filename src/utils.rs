use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::info;
use walkdir::WalkDir;

use crate::media::{KindMatcher, MediaKind};

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap()
        .progress_chars("#>-")
}

pub fn pb_style_spinner() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
        .unwrap()
}

/// 扫描目录下所有支持的媒体文件，`path` 为文件时只检查它本身
///
/// 结果按路径排序，保证多次扫描的顺序一致。
pub fn scan_media(path: impl AsRef<Path>, kinds: &KindMatcher) -> Vec<(PathBuf, MediaKind)> {
    let path = path.as_ref();
    info!("开始扫描: {}", path.display());
    let pb = ProgressBar::no_length().with_style(pb_style_spinner());
    let mut entries = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .progress_with(pb)
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.file_type().is_file() {
                return None;
            }
            let kind = kinds.kind_of(entry.path())?;
            Some((entry.into_path(), kind))
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let videos = entries.iter().filter(|(_, kind)| *kind == MediaKind::Video).count();
    info!("扫描完成，共 {} 张图片，{} 个视频", entries.len() - videos, videos);
    entries
}
