//! 知识库：Markdown 分块、向量索引与 top-k 语义检索

pub mod chunker;
pub mod index;
pub mod loader;
pub mod retriever;

pub use chunker::{Chunk, Chunker};
pub use index::{cosine_similarity, InMemoryIndex, VectorIndex};
pub use loader::load_retriever;
pub use retriever::{GroundingRetriever, RankedChunk};
