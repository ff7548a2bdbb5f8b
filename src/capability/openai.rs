//! OpenAI 兼容后端
//!
//! 补全与向量化走 async_openai（可配置 base_url，支持自建代理）；审核端点
//! async_openai 未启用对应 feature，直接用 reqwest 调 /moderations。

use std::collections::HashMap;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{CompletionClient, EmbeddingClient, ModerationClient, ModerationVerdict};
use crate::session::{Role, Turn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

fn build_config(base_url: Option<&str>, api_key: &str) -> OpenAIConfig {
    if let Some(url) = base_url {
        OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
    } else {
        OpenAIConfig::new().with_api_key(api_key)
    }
}

/// OpenAI 兼容补全客户端
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiCompletion {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, temperature: f32) -> Self {
        Self {
            client: Client::with_config(build_config(base_url, api_key)),
            model: model.to_string(),
            temperature,
        }
    }

    fn to_openai_messages(&self, messages: &[Turn]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
            })
            .collect()
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletion {
    async fn complete(&self, messages: &[Turn]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(self.to_openai_messages(messages))
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

/// OpenAI 兼容向量化客户端
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            client: Client::with_config(build_config(base_url, api_key)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        let vec = response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .unwrap_or_default();
        Ok(vec)
    }

    /// 批量输入一次请求完成
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: HashMap<String, bool>,
}

/// OpenAI 审核端点客户端（reqwest 直调）
pub struct OpenAiModeration {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiModeration {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ModerationClient for OpenAiModeration {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, String> {
        let url = format!("{}/moderations", self.base_url);
        let body = serde_json::json!({ "input": text, "model": self.model });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("moderation endpoint returned {}", response.status()));
        }

        let parsed: ModerationResponse = response.json().await.map_err(|e| e.to_string())?;
        let result = match parsed.results.into_iter().next() {
            Some(r) => r,
            None => return Ok(ModerationVerdict::default()),
        };

        let mut categories: Vec<String> = result
            .categories
            .into_iter()
            .filter(|(_, hit)| *hit)
            .map(|(name, _)| name)
            .collect();
        categories.sort();

        Ok(ModerationVerdict {
            flagged: result.flagged,
            categories,
        })
    }
}
