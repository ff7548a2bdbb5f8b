//! 外部能力抽象
//!
//! 管道只见三个 trait：补全、向量化、内容审核。后端（OpenAI 兼容 / Mock）
//! 在工厂里选择，调用方不感知提供商类型。

use async_trait::async_trait;

use crate::session::Turn;

/// 补全能力：一次非流式对话补全
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[Turn]) -> Result<String, String>;
}

/// 向量化能力
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;

    /// 批量向量化；默认逐条调用，支持数组输入的后端可覆盖
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// 审核结论
#[derive(Clone, Debug, Default)]
pub struct ModerationVerdict {
    pub flagged: bool,
    /// 命中的违规类别名
    pub categories: Vec<String>,
}

/// 内容审核能力
#[async_trait]
pub trait ModerationClient: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, String>;
}
