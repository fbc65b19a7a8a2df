use super::Embedder;
use crate::error::ModelError;

/// 基于特征哈希的本地向量化，不依赖任何模型
///
/// 每个词和它的字符三元组被哈希到固定的维度上，最后做 L2 归一化。
/// 相同的文本总是得到相同的向量，适合离线使用和测试。
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dim must be positive");
        Self { dim }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokenize(text) {
            self.add_feature(&mut v, token.as_bytes(), 1.0);
            let padded: Vec<char> = format!("^{token}$").chars().collect();
            for tri in padded.windows(3) {
                let tri: String = tri.iter().collect();
                self.add_feature(&mut v, tri.as_bytes(), 0.5);
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0. {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = blake3::hash(feature);
        let bytes = h.as_bytes();
        let mut idx = [0u8; 8];
        idx.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(idx) % self.dim as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1. } else { -1. };
        v[bucket] += sign * weight;
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(self.embed_sync(text))
    }
}
