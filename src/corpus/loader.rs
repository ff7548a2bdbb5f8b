//! 知识库装载：扫描目录下的 Markdown，分块、向量化、建索引
//!
//! 目录缺失或没有文档时给空索引并告警，进程照常启动（回复走 fallback）。

use std::sync::Arc;

use super::chunker::{Chunk, Chunker};
use super::retriever::GroundingRetriever;
use crate::capability::EmbeddingClient;
use crate::config::CorpusSection;

/// 扫描 knowledge_dir 并构建检索器
pub async fn load_retriever(
    cfg: &CorpusSection,
    embedder: Arc<dyn EmbeddingClient>,
) -> GroundingRetriever {
    if !cfg.knowledge_dir.is_dir() {
        tracing::warn!(
            "knowledge directory {:?} not found, retrieval disabled",
            cfg.knowledge_dir
        );
        return GroundingRetriever::empty(embedder);
    }

    let chunker = Chunker::new(cfg.chunk_size, cfg.chunk_overlap);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut documents = 0usize;

    for entry in walkdir::WalkDir::new(&cfg.knowledge_dir)
        .max_depth(5)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("skipping unreadable document {:?}: {}", path, e);
                continue;
            }
        };

        let doc_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();

        chunks.extend(chunker.chunk(&doc_id, &text));
        documents += 1;
    }

    if chunks.is_empty() {
        tracing::warn!("no markdown documents under {:?}, retrieval disabled", cfg.knowledge_dir);
        return GroundingRetriever::empty(embedder);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = match embedder.embed_batch(&texts).await {
        Ok(v) if v.len() == chunks.len() => v,
        Ok(v) => {
            tracing::warn!(
                "embedding count mismatch ({} vectors for {} chunks), retrieval disabled",
                v.len(),
                chunks.len()
            );
            return GroundingRetriever::empty(embedder);
        }
        Err(e) => {
            tracing::warn!("corpus embedding failed, retrieval disabled: {}", e);
            return GroundingRetriever::empty(embedder);
        }
    };

    tracing::info!(
        "knowledge base loaded: {} documents, {} chunks",
        documents,
        chunks.len()
    );
    GroundingRetriever::with_chunks(embedder, chunks, vectors)
}
