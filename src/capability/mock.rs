//! Mock 能力实现（测试与离线运行）
//!
//! 全部确定性：补全回显最后一条用户消息，向量由文本字节推导（相同文本
//! 相同向量），审核按词表命中。带调用计数，供测试断言「从未调用」。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::traits::{CompletionClient, EmbeddingClient, ModerationClient, ModerationVerdict};
use crate::session::{Role, Turn};

/// Mock 补全：固定共情回复
#[derive(Debug, Default)]
pub struct MockCompletion {
    reply: Option<String>,
    fail: bool,
    count: AtomicUsize,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// 固定返回给定文本
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::default()
        }
    }

    /// 每次调用都失败（测试降级路径）
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(&self, messages: &[Turn]) -> Result<String, String> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("mock completion failure".to_string());
        }
        if let Some(reply) = &self.reply {
            return Ok(reply.clone());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!(
            "I hear you, and thank you for sharing that with me. (offline response to: {})",
            last_user
        ))
    }
}

/// Mock 向量化：文本字节推导的归一化向量
#[derive(Debug)]
pub struct MockEmbedding {
    dim: usize,
    fail: bool,
    count: AtomicUsize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self {
            dim: 8,
            fail: false,
            count: AtomicUsize::new(0),
        }
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("mock embedding failure".to_string());
        }
        Ok(pseudo_embed(text, self.dim))
    }
}

/// 相同文本产生相同向量；不同文本大概率方向不同
fn pseudo_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    for (i, b) in text.bytes().enumerate() {
        v[i % dim] += (b as f32) / 255.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Mock 审核：按词表命中
#[derive(Debug, Default)]
pub struct MockModeration {
    flag_terms: Vec<String>,
    fail: bool,
    count: AtomicUsize,
}

impl MockModeration {
    /// 全放行
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// 命中任一词（大小写不敏感）则标记，类别名取词本身
    pub fn flagging(terms: &[&str]) -> Self {
        Self {
            flag_terms: terms.iter().map(|t| t.to_lowercase()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModerationClient for MockModeration {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, String> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("mock moderation failure".to_string());
        }
        let lower = text.to_lowercase();
        let categories: Vec<String> = self
            .flag_terms
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .cloned()
            .collect();
        Ok(ModerationVerdict {
            flagged: !categories.is_empty(),
            categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_echoes_last_user_turn() {
        let mock = MockCompletion::new();
        let reply = mock
            .complete(&[Turn::system("ctx"), Turn::user("rough week")])
            .await
            .unwrap();
        assert!(reply.contains("rough week"));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let mock = MockEmbedding::new();
        let a = mock.embed("same text").await.unwrap();
        let b = mock.embed("same text").await.unwrap();
        let c = mock.embed("different words entirely").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_moderation_flags_configured_terms() {
        let mock = MockModeration::flagging(&["harmful"]);
        let verdict = mock.moderate("something HARMFUL here").await.unwrap();
        assert!(verdict.flagged);
        assert_eq!(verdict.categories, vec!["harmful".to_string()]);

        let verdict = mock.moderate("an ordinary message").await.unwrap();
        assert!(!verdict.flagged);
    }
}
