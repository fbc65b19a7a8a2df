use std::process::Stdio;

use log::debug;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Caption, Embedder, MediaDescriptor};
use crate::error::ModelError;

/// 外部命令，例如 `python3 describe.py --model blip`
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// 按空白切分命令行，不支持引号
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        let mut parts = s.split_whitespace().map(str::to_owned);
        let program = parts
            .next()
            .ok_or_else(|| ModelError::Spawn { program: String::new(), reason: "empty command".into() })?;
        Ok(Self { program, args: parts.collect() })
    }

    /// 运行命令，将 `input` 写入 stdin，返回 stdout
    pub async fn run(&self, input: &[u8]) -> Result<Vec<u8>, ModelError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModelError::Spawn { program: self.program.clone(), reason: e.to_string() })?;

        // NOTE: 写入 stdin 必须和读取 stdout 并发进行，否则输出较大时会互相阻塞
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ModelError::Failed(format!("{}: stdin unavailable", self.program)))?;
        let input = input.to_vec();
        let writer = tokio::spawn(async move {
            // 有些程序不读取 stdin，此处忽略 broken pipe
            let _ = stdin.write_all(&input).await;
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ModelError::Failed(format!("{}: {e}", self.program)))?;
        let _ = writer.await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        debug!("{} produced {} bytes", self.program, output.stdout.len());
        Ok(output.stdout)
    }
}

/// 通过外部命令生成描述
///
/// 命令从 stdin 读取图片，向 stdout 输出 `{"caption": "...", "score": 0.9}`，
/// 或者直接输出描述文本（此时分数为 1.0）。
pub struct CommandDescriptor {
    command: CommandLine,
}

impl CommandDescriptor {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[derive(Deserialize)]
struct CaptionOutput {
    caption: String,
    #[serde(default = "default_score")]
    score: f32,
}

fn default_score() -> f32 {
    1.0
}

pub(crate) fn parse_caption(stdout: &[u8]) -> Result<Caption, ModelError> {
    let caption = match serde_json::from_slice::<CaptionOutput>(stdout) {
        Ok(out) => Caption { text: out.caption.trim().to_owned(), score: out.score },
        Err(_) => Caption { text: String::from_utf8_lossy(stdout).trim().to_owned(), score: 1.0 },
    };
    if caption.text.is_empty() {
        return Err(ModelError::InvalidOutput("empty caption".into()));
    }
    Ok(caption)
}

impl MediaDescriptor for CommandDescriptor {
    async fn describe(&self, image: &[u8]) -> Result<Caption, ModelError> {
        let stdout = self.command.run(image).await?;
        parse_caption(&stdout)
    }
}

/// 通过外部命令生成向量，命令从 stdin 读取文本，向 stdout 输出 JSON 数组
pub struct CommandEmbedder {
    command: CommandLine,
    dim: usize,
}

impl CommandEmbedder {
    pub fn new(command: CommandLine, dim: usize) -> Self {
        Self { command, dim }
    }
}

impl Embedder for CommandEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let stdout = self.command.run(text.as_bytes()).await?;
        let vector: Vec<f32> = serde_json::from_slice(&stdout)
            .map_err(|e| ModelError::InvalidOutput(format!("embedding is not a float array: {e}")))?;
        if vector.len() != self.dim {
            return Err(ModelError::InvalidOutput(format!(
                "expected {} dimensions, got {}",
                self.dim,
                vector.len()
            )));
        }
        Ok(vector)
    }
}
