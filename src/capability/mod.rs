//! 外部能力层：补全 / 向量化 / 内容审核（OpenAI 兼容或离线 Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockCompletion, MockEmbedding, MockModeration};
pub use openai::{OpenAiCompletion, OpenAiEmbedder, OpenAiModeration};
pub use traits::{CompletionClient, EmbeddingClient, ModerationClient, ModerationVerdict};

use crate::config::ProviderSection;

/// 管道用到的三个能力句柄
#[derive(Clone)]
pub struct Capabilities {
    pub completion: Arc<dyn CompletionClient>,
    pub embedding: Arc<dyn EmbeddingClient>,
    pub moderation: Arc<dyn ModerationClient>,
}

impl Capabilities {
    /// 测试/离线用：全 Mock
    pub fn mock() -> Self {
        Self {
            completion: Arc::new(MockCompletion::new()),
            embedding: Arc::new(MockEmbedding::new()),
            moderation: Arc::new(MockModeration::allow_all()),
        }
    }
}

/// 按配置创建能力集；无有效 OPENAI_API_KEY 时回退 Mock（进程可离线跑通）
pub fn create_capabilities(cfg: &ProviderSection) -> Capabilities {
    let key = std::env::var("OPENAI_API_KEY").ok();
    let key = match key.as_deref() {
        Some(k) if !k.is_empty() && k != "sk-placeholder" => k.to_string(),
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, using offline mock capabilities");
            return Capabilities::mock();
        }
    };

    let base_url = cfg.base_url.as_deref();
    Capabilities {
        completion: Arc::new(OpenAiCompletion::new(
            base_url,
            &cfg.chat_model,
            &key,
            cfg.temperature,
        )),
        embedding: Arc::new(OpenAiEmbedder::new(base_url, &cfg.embedding_model, &key)),
        moderation: Arc::new(OpenAiModeration::new(base_url, &cfg.moderation_model, &key)),
    }
}
