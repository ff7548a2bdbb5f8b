//! 检索器：查询文本 → 向量 → top-k 知识块
//!
//! 任何失败（向量化出错、索引为空）都降级为空结果并记日志，
//! 管道继续走无据合成，不对用户报错。

use std::collections::HashMap;
use std::sync::Arc;

use super::chunker::Chunk;
use super::index::{InMemoryIndex, VectorIndex};
use crate::capability::EmbeddingClient;

/// 带分数的检索结果
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub score: f32,
}

/// 语义检索器（索引启动时构建，之后只读）
pub struct GroundingRetriever {
    chunks: HashMap<String, Chunk>,
    index: Box<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl GroundingRetriever {
    /// 空索引（知识库缺失时仍可运行）
    pub fn empty(embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            chunks: HashMap::new(),
            index: Box::new(InMemoryIndex::new()),
            embedder,
        }
    }

    /// 由已向量化的块构建。chunks 与 vectors 一一对应。
    pub fn with_chunks(
        embedder: Arc<dyn EmbeddingClient>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Self {
        let mut index = InMemoryIndex::new();
        index.upsert(
            chunks
                .iter()
                .zip(vectors.into_iter())
                .map(|(c, v)| (c.id.clone(), v))
                .collect(),
        );
        Self {
            chunks: chunks.into_iter().map(|c| (c.id.clone(), c)).collect(),
            index: Box::new(index),
            embedder,
        }
    }

    /// top-k 检索；失败时返回空
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<RankedChunk> {
        if self.index.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_vec = match self.embedder.embed(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!("query embedding failed, answering ungrounded: {}", e);
                return Vec::new();
            }
        };

        self.index
            .query(&query_vec, k)
            .into_iter()
            .filter_map(|(id, score)| {
                self.chunks.get(&id).map(|chunk| RankedChunk {
                    id,
                    text: chunk.text.clone(),
                    source: chunk.source.clone(),
                    score,
                })
            })
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockEmbedding;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source: "doc".to_string(),
            offset: 0,
        }
    }

    async fn build_retriever(embedder: Arc<MockEmbedding>, texts: &[(&str, &str)]) -> GroundingRetriever {
        let chunks: Vec<Chunk> = texts.iter().map(|(id, t)| chunk(id, t)).collect();
        let mut vectors = Vec::new();
        for (_, text) in texts {
            vectors.push(embedder.embed(text).await.unwrap());
        }
        GroundingRetriever::with_chunks(embedder, chunks, vectors)
    }

    #[tokio::test]
    async fn test_identical_text_ranks_first() {
        let embedder = Arc::new(MockEmbedding::new());
        let retriever = build_retriever(
            embedder,
            &[
                ("a_0", "totally unrelated content about gardens"),
                ("b_0", "breathing exercises for anxiety"),
            ],
        )
        .await;

        let results = retriever.retrieve("breathing exercises for anxiety", 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "b_0");
        assert!((results[0].score - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_empty() {
        let good = Arc::new(MockEmbedding::new());
        let chunks = vec![chunk("a_0", "some grounding text")];
        let vectors = vec![good.embed("some grounding text").await.unwrap()];

        let failing = Arc::new(MockEmbedding::failing());
        let retriever = GroundingRetriever::with_chunks(failing, chunks, vectors);

        assert!(retriever.retrieve("anything", 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_without_embedding_call() {
        let embedder = Arc::new(MockEmbedding::new());
        let retriever = GroundingRetriever::empty(embedder.clone());

        assert!(retriever.retrieve("anything", 4).await.is_empty());
        assert_eq!(embedder.calls(), 0);
    }
}
