//! 向量索引
//!
//! 检索按余弦相似度降序取 top-k，不设相似度下限：再弱的前 k 条也返回，
//! 分数并列时保持插入顺序。

/// 向量索引接口（启动时一次性构建，之后只读）
pub trait VectorIndex: Send + Sync {
    /// 插入或替换（按 ID）
    fn upsert(&mut self, entries: Vec<(String, Vec<f32>)>);

    /// 返回 (chunk_id, score)，按分数降序
    fn query(&self, vector: &[f32], k: usize) -> Vec<(String, f32)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 内存实现：线性扫描 + 余弦相似度
#[derive(Default)]
pub struct InMemoryIndex {
    entries: Vec<(String, Vec<f32>)>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for InMemoryIndex {
    fn upsert(&mut self, entries: Vec<(String, Vec<f32>)>) {
        for (id, vector) in entries {
            if let Some(existing) = self.entries.iter_mut().find(|(eid, _)| *eid == id) {
                existing.1 = vector;
            } else {
                self.entries.push((id, vector));
            }
        }
    }

    fn query(&self, vector: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|(id, emb)| (id.clone(), cosine_similarity(vector, emb)))
            .collect();

        // sort_by 是稳定排序，分数相同的保持插入顺序
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
