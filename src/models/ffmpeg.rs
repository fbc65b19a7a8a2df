use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use log::debug;
use rand::distr::{Alphanumeric, SampleString};
use regex::Regex;
use tokio::process::Command;

use super::{ExtractConfig, Frame, KeyframeExtractor};
use crate::error::ModelError;

static PTS_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Parsed_showinfo.*\bpts_time:\s*(-?[0-9]+(?:\.[0-9]+)?)").unwrap());

/// 使用 ffmpeg 的场景检测抽取关键帧
///
/// 第一帧总是会被保留，之后每当场景变化超过阈值时保留一帧。
/// 帧先写入临时目录，读取完成后删除。
pub struct FfmpegExtractor {
    program: String,
    scratch: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(scratch: impl Into<PathBuf>) -> Self {
        Self { program: "ffmpeg".to_owned(), scratch: scratch.into() }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, path: &Path, dir: &Path, config: ExtractConfig) -> Result<Vec<Frame>, ModelError> {
        let filter = format!("select='eq(n\\,0)+gt(scene\\,{})',showinfo", config.threshold);
        let output = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-i")
            .arg(path)
            .args(["-vf", &filter, "-vsync", "vfr"])
            .arg("-frames:v")
            .arg(config.max_keyframes.to_string())
            .arg(dir.join("%06d.jpg"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ModelError::Spawn { program: self.program.clone(), reason: e.to_string() })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let last = stderr.lines().last().unwrap_or_default();
            return Err(ModelError::Failed(format!("ffmpeg exited with {}: {last}", output.status)));
        }

        let timestamps = parse_pts_times(&stderr);
        let mut files = std::fs::read_dir(dir)
            .map_err(|e| ModelError::Failed(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect::<Vec<_>>();
        files.sort();
        debug!("ffmpeg wrote {} frames, reported {} timestamps", files.len(), timestamps.len());
        if files.len() != timestamps.len() {
            return Err(ModelError::InvalidOutput(format!(
                "ffmpeg wrote {} frames but reported {} timestamps",
                files.len(),
                timestamps.len()
            )));
        }

        let mut frames = Vec::with_capacity(files.len());
        for (file, ts) in files.iter().zip(timestamps) {
            let data = tokio::fs::read(file).await.map_err(|e| ModelError::Failed(e.to_string()))?;
            frames.push(Frame { timestamp_ms: ts, data });
        }
        Ok(frames)
    }
}

/// 从 showinfo 的输出中解析每帧的时间戳（毫秒）
///
/// 带编辑列表的容器开头可能出现负的 pts_time，统一记为 0
fn parse_pts_times(stderr: &str) -> Vec<i64> {
    stderr
        .lines()
        .filter_map(|line| PTS_TIME.captures(line))
        .filter_map(|cap| cap[1].parse::<f64>().ok())
        .map(|secs| ((secs * 1000.).round() as i64).max(0))
        .collect()
}

impl KeyframeExtractor for FfmpegExtractor {
    async fn extract(&self, path: &Path, _video: &[u8], config: ExtractConfig) -> Result<Vec<Frame>, ModelError> {
        let dir = self.scratch.join(Alphanumeric.sample_string(&mut rand::rng(), 12));
        tokio::fs::create_dir_all(&dir).await.map_err(|e| ModelError::Failed(e.to_string()))?;
        let _guard = ScratchDir(dir.clone());
        self.run(path, &dir, config).await
    }
}

/// 离开作用域时删除临时目录，抽帧被取消时也不会留下垃圾文件
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_showinfo() {
        let log = "\
[Parsed_showinfo_1 @ 0x55d] config in time_base: 1/12800, frame_rate: 25/1
[Parsed_showinfo_1 @ 0x55d] n:   0 pts:      0 pts_time:0       duration:512
[Parsed_showinfo_1 @ 0x55d] n:   1 pts:  64000 pts_time:5       duration:512
[Parsed_showinfo_1 @ 0x55d] n:   2 pts:  81920 pts_time:6.4     duration:512
frame=    3 fps=0.0 q=2.0 Lsize=N/A time=00:00:06.44";
        assert_eq!(parse_pts_times(log), [0, 5000, 6400]);
    }

    #[test]
    fn negative_pts_is_clamped() {
        let log = "\
[Parsed_showinfo_1 @ 0x55d] n:   0 pts:  -1024 pts_time:-0.04   duration:512
[Parsed_showinfo_1 @ 0x55d] n:   1 pts:  64000 pts_time:5       duration:512";
        assert_eq!(parse_pts_times(log), [0, 5000]);
    }

    /// 写出两帧却只报告一个时间戳的假 ffmpeg
    #[cfg(unix)]
    #[tokio::test]
    async fn frame_count_must_match_timestamps() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             for out; do :; done\n\
             d=$(dirname \"$out\")\n\
             echo a > \"$d/000001.jpg\"\n\
             echo b > \"$d/000002.jpg\"\n\
             echo '[Parsed_showinfo_1 @ 0x1] n:   0 pts:      0 pts_time:0' >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let extractor = FfmpegExtractor::new(dir.path().join("scratch")).with_program(script.to_string_lossy());
        let config = ExtractConfig { threshold: 0.3, max_keyframes: 8 };
        let err = extractor.extract(Path::new("clip.mp4"), &[], config).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidOutput(_)), "{err}");
    }
}
