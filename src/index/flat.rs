use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::*;

use super::*;
use crate::error::Error;

/// 暴力搜索的向量索引
///
/// 向量按行连续存储，删除时用最后一行填补空位。
/// 本地语料通常只有几十万条描述，暴力搜索配合 rayon 足够快，
/// 而且结果是精确的，删除也不需要重建。
pub struct FlatIndex {
    metric: Metric,
    dim: Option<usize>,
    data: Vec<f32>,
    norms: Vec<f32>,
    entries: Vec<(i64, EntryMeta)>,
    positions: HashMap<i64, usize>,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            dim: None,
            data: vec![],
            norms: vec![],
            entries: vec![],
            positions: HashMap::new(),
        }
    }

    pub fn with_dim(metric: Metric, dim: usize) -> Self {
        Self { dim: Some(dim), ..Self::new(metric) }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// 检查向量维数是否与索引一致
    pub fn check_dim(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::InvalidArgument("empty embedding".into()));
        }
        match self.dim {
            Some(dim) if dim != len => Err(Error::InvalidArgument(format!(
                "embedding has {len} dimensions, index expects {dim}"
            ))),
            _ => Ok(()),
        }
    }

    fn row(&self, pos: usize) -> &[f32] {
        let dim = self.dim.unwrap_or(0);
        &self.data[pos * dim..(pos + 1) * dim]
    }

    fn similarity(&self, query: &[f32], query_norm: f32, pos: usize) -> f32 {
        let dot = dot(query, self.row(pos));
        match self.metric {
            Metric::Dot => dot,
            Metric::Cosine => {
                let denom = query_norm * self.norms[pos];
                if denom > 0. { dot / denom } else { 0. }
            }
        }
    }
}

impl VectorIndex for FlatIndex {
    fn dim(&self) -> Option<usize> {
        self.dim
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, record_id: i64) -> bool {
        self.positions.contains_key(&record_id)
    }

    fn insert(&mut self, entry: IndexEntry) -> Result<()> {
        self.check_dim(entry.vector.len())?;
        if self.positions.contains_key(&entry.record_id) {
            return Err(Error::StoreConsistency(format!(
                "record {} is already indexed",
                entry.record_id
            )));
        }
        self.dim = Some(entry.vector.len());
        self.positions.insert(entry.record_id, self.entries.len());
        self.norms.push(dot(&entry.vector, &entry.vector).sqrt());
        self.data.extend_from_slice(&entry.vector);
        self.entries.push((entry.record_id, entry.meta));
        Ok(())
    }

    fn remove(&mut self, record_id: i64) -> Option<IndexEntry> {
        let pos = self.positions.remove(&record_id)?;
        let dim = self.dim.unwrap_or(0);
        let last = self.entries.len() - 1;

        let vector = self.row(pos).to_vec();
        if pos != last {
            self.data.copy_within(last * dim..(last + 1) * dim, pos * dim);
            let moved = self.entries[last].0;
            self.positions.insert(moved, pos);
        }
        self.data.truncate(last * dim);
        self.norms.swap_remove(pos);
        let (_, meta) = self.entries.swap_remove(pos);

        Some(IndexEntry { record_id, vector, meta })
    }

    fn query_filtered<F>(&self, vector: &[f32], k: usize, filter: F) -> Result<Vec<Hit>>
    where
        F: Fn(&EntryMeta) -> bool + Sync,
    {
        if k == 0 || self.entries.is_empty() {
            return Ok(vec![]);
        }
        self.check_dim(vector.len())?;

        let query_norm = dot(vector, vector).sqrt();
        let mut scored = (0..self.entries.len())
            .into_par_iter()
            .filter(|&pos| filter(&self.entries[pos].1))
            .map(|pos| (pos, self.similarity(vector, query_norm, pos)))
            .collect::<Vec<_>>();

        let cmp = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            let (ea, eb) = (&self.entries[a.0], &self.entries[b.0]);
            b.1.total_cmp(&a.1)
                .then_with(|| eb.1.created_at.cmp(&ea.1.created_at))
                .then_with(|| eb.0.cmp(&ea.0))
        };
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, cmp);
            scored.truncate(k);
        }
        scored.sort_unstable_by(cmp);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| {
                let (record_id, meta) = &self.entries[pos];
                Hit { record_id: *record_id, score, meta: meta.clone() }
            })
            .collect())
    }

    fn record_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }
}

#[inline(always)]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, Target};

    fn meta(media_id: i64, created_at: i64) -> EntryMeta {
        EntryMeta {
            media_id,
            media_kind: MediaKind::Image,
            path: format!("{media_id}.jpg"),
            target: Target::Media(media_id),
            ordinal: None,
            timestamp_ms: None,
            caption: String::new(),
            created_at,
        }
    }

    /// 与 [1, 0] 的余弦相似度为 `cos` 的单位向量
    fn at(cos: f32) -> Vec<f32> {
        vec![cos, (1. - cos * cos).sqrt()]
    }

    fn entry(id: i64, vector: Vec<f32>, created_at: i64) -> IndexEntry {
        IndexEntry { record_id: id, vector, meta: meta(id, created_at) }
    }

    #[test]
    fn ranks_by_similarity() {
        let mut index = FlatIndex::new(Metric::Cosine);
        index.insert(entry(1, at(0.4), 0)).unwrap();
        index.insert(entry(2, at(0.9), 0)).unwrap();

        let hits = index.query(&[1., 0.], 2).unwrap();
        assert_eq!(hits.iter().map(|h| h.record_id).collect::<Vec<_>>(), [2, 1]);
        assert!((hits[0].score - 0.9).abs() < 1e-5);
        assert!((hits[1].score - 0.4).abs() < 1e-5);
    }

    #[test]
    fn ties_prefer_newer() {
        let mut index = FlatIndex::new(Metric::Cosine);
        index.insert(entry(1, at(0.5), 100)).unwrap();
        index.insert(entry(2, at(0.5), 200)).unwrap();
        index.insert(entry(3, at(0.5), 50)).unwrap();

        let hits = index.query(&[1., 0.], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.record_id).collect::<Vec<_>>(), [2, 1, 3]);
    }

    #[test]
    fn truncates_to_k() {
        let mut index = FlatIndex::new(Metric::Cosine);
        for i in 0..50 {
            index.insert(entry(i, at(i as f32 / 50.), 0)).unwrap();
        }
        let hits = index.query(&[1., 0.], 5).unwrap();
        assert_eq!(hits.iter().map(|h| h.record_id).collect::<Vec<_>>(), [49, 48, 47, 46, 45]);
    }

    #[test]
    fn remove_keeps_rows_aligned() {
        let mut index = FlatIndex::new(Metric::Cosine);
        index.insert(entry(1, vec![1., 0., 0.], 0)).unwrap();
        index.insert(entry(2, vec![0., 1., 0.], 0)).unwrap();
        index.insert(entry(3, vec![0., 0., 1.], 0)).unwrap();

        let removed = index.remove(1).unwrap();
        assert_eq!(removed.vector, [1., 0., 0.]);
        assert!(index.remove(1).is_none());
        assert_eq!(index.len(), 2);
        assert!(!index.contains(1));

        let hits = index.query(&[0., 0., 1.], 1).unwrap();
        assert_eq!(hits[0].record_id, 3);
        assert!((hits[0].score - 1.).abs() < 1e-6);
        let hits = index.query(&[1., 0., 0.], 2).unwrap();
        assert!(hits.iter().all(|h| h.score.abs() < 1e-6));
    }

    #[test]
    fn rejects_duplicates_and_bad_dims() {
        let mut index = FlatIndex::with_dim(Metric::Cosine, 2);
        assert!(matches!(index.insert(entry(1, vec![1., 0., 0.], 0)), Err(Error::InvalidArgument(_))));
        index.insert(entry(1, vec![1., 0.], 0)).unwrap();
        assert!(matches!(index.insert(entry(1, vec![0., 1.], 0)), Err(Error::StoreConsistency(_))));
        assert!(index.query(&[1., 0., 0.], 1).is_err());
    }

    #[test]
    fn filter_and_empty() {
        let mut index = FlatIndex::new(Metric::Cosine);
        assert!(index.query(&[1., 0.], 3).unwrap().is_empty());
        index.insert(entry(1, at(0.9), 0)).unwrap();
        index.insert(entry(2, at(0.1), 0)).unwrap();
        let hits = index.query_filtered(&[1., 0.], 3, |m| m.media_id == 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, 2);
    }
}
