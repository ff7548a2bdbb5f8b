//! 回复合成：检索增强提示 + 单次补全 + 声明策略
//!
//! 每轮只调一次补全。无检索结果时直接用兜底文本，不做无依据生成。
//! 声明策略：会话首条助手回复附完整声明；之后命中医疗话题附简短
//! 声明；单轮最多一条。

use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::CompletionClient;
use crate::corpus::RankedChunk;
use crate::session::{Role, Turn};

use super::ethics::{INITIAL_DISCLAIMER, SESSION_DISCLAIMER};

/// 无相关知识时的兜底回复
pub const FALLBACK_RESPONSE: &str = "I'm sorry you're going through this. While I don't \
have specific advice for your situation, I strongly recommend reaching out to a licensed \
mental health professional who can provide personalized support. Would you like me to \
provide information on how to find mental health resources?";

/// 共情语气准则，逐条写进 system 提示
const TONE_GUIDELINES: &[&str] = &[
    "Use a warm, supportive tone throughout your response.",
    "Validate the user's feelings and experiences.",
    "Avoid judgmental language or minimizing their concerns.",
    "Use phrases like 'I understand', 'That sounds difficult', or 'It's okay to feel this way'.",
    "Balance empathy with factual information from the provided context.",
    "When suggesting strategies, present them as options rather than commands.",
    "Acknowledge the limits of your support and encourage professional help when appropriate.",
];

/// 话题沾医疗边就附简短声明。比伦理门的重定向模式窄：这里只是
/// 加一句提醒，误附无害，所以用子串匹配即可。
const MEDICAL_TOPIC_STEMS: &[&str] = &[
    "medication",
    "diagnos",
    "treatment",
    "dosage",
    "side effect",
    "prescri",
    "therapist",
    "psychiatrist",
];

/// 一次合成的输入
pub struct SynthesisInput<'a> {
    pub user_text: &'a str,
    pub chunks: &'a [RankedChunk],
    pub attributes: &'a HashMap<String, String>,
    /// 本条用户消息之前的完整历史，合成时截到最近 max_context_turns 条
    pub history: &'a [Turn],
    pub first_assistant_turn: bool,
}

/// 合成结果
pub struct Synthesis {
    pub text: String,
    /// 实际进入提示的 chunk id，写入助手轮次做溯源
    pub used_chunks: Vec<String>,
}

/// 回复合成器
pub struct ResponseSynthesizer {
    completion: Arc<dyn CompletionClient>,
    max_context_turns: usize,
}

impl ResponseSynthesizer {
    pub fn new(completion: Arc<dyn CompletionClient>, max_context_turns: usize) -> Self {
        Self {
            completion,
            max_context_turns,
        }
    }

    /// 合成一条回复。补全失败或无 chunk 时降级为兜底文本。
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Synthesis {
        if input.chunks.is_empty() {
            tracing::info!("no grounding chunks, using fallback response");
            return Synthesis {
                text: self.apply_disclaimer(FALLBACK_RESPONSE.to_string(), &input),
                used_chunks: Vec::new(),
            };
        }

        let messages = self.build_messages(&input);
        match self.completion.complete(&messages).await {
            Ok(text) => Synthesis {
                text: self.apply_disclaimer(text, &input),
                used_chunks: input.chunks.iter().map(|c| c.id.clone()).collect(),
            },
            Err(e) => {
                tracing::error!("completion failed, using fallback response: {}", e);
                Synthesis {
                    text: self.apply_disclaimer(FALLBACK_RESPONSE.to_string(), &input),
                    used_chunks: Vec::new(),
                }
            }
        }
    }

    /// 组装提示：system（人设 + 语气准则 + 用户画像 + 知识上下文），
    /// 然后最近的对话历史，最后当前消息。
    fn build_messages(&self, input: &SynthesisInput<'_>) -> Vec<Turn> {
        let mut system = String::from(
            "You are a mental health support companion designed to provide empathetic \
             and factually accurate responses.\n\nEMPATHETIC TONE GUIDELINES:\n",
        );
        for guideline in TONE_GUIDELINES {
            system.push_str(&format!("- {}\n", guideline));
        }

        if !input.attributes.is_empty() {
            let mut keys: Vec<&String> = input.attributes.keys().collect();
            keys.sort();
            system.push_str("\nKNOWN USER DETAILS:\n");
            for key in keys {
                system.push_str(&format!("- {}: {}\n", key, input.attributes[key]));
            }
        }

        system.push_str("\nCONTEXT INFORMATION:\n");
        for (i, chunk) in input.chunks.iter().enumerate() {
            system.push_str(&format!(
                "Document {} (from {}):\n{}\n\n",
                i + 1,
                chunk.source,
                chunk.text
            ));
        }

        system.push_str(
            "Ground your response in the context information provided. Always prioritize \
             user safety and well-being. Do not diagnose conditions or provide medical \
             advice. If the context doesn't contain relevant information, acknowledge \
             this and suggest seeking professional help.",
        );

        let mut messages = vec![Turn::system(system)];

        let conversational: Vec<&Turn> = input
            .history
            .iter()
            .filter(|t| t.role == Role::User || t.role == Role::Assistant)
            .collect();
        let skip = conversational.len().saturating_sub(self.max_context_turns);
        for turn in conversational.into_iter().skip(skip) {
            messages.push(turn.clone());
        }

        messages.push(Turn::user(input.user_text));
        messages
    }

    fn apply_disclaimer(&self, text: String, input: &SynthesisInput<'_>) -> String {
        if input.first_assistant_turn {
            format!("{}\n\n{}", text, INITIAL_DISCLAIMER)
        } else if is_medical_topic(input.user_text) {
            format!("{}\n\n{}", text, SESSION_DISCLAIMER)
        } else {
            text
        }
    }
}

fn is_medical_topic(text: &str) -> bool {
    let lower = text.to_lowercase();
    MEDICAL_TOPIC_STEMS.iter().any(|stem| lower.contains(stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MockCompletion;

    fn chunk(id: &str, source: &str, text: &str) -> RankedChunk {
        RankedChunk {
            id: id.to_string(),
            text: text.to_string(),
            source: source.to_string(),
            score: 0.9,
        }
    }

    fn input<'a>(
        user_text: &'a str,
        chunks: &'a [RankedChunk],
        attributes: &'a HashMap<String, String>,
        history: &'a [Turn],
        first: bool,
    ) -> SynthesisInput<'a> {
        SynthesisInput {
            user_text,
            chunks,
            attributes,
            history,
            first_assistant_turn: first,
        }
    }

    #[tokio::test]
    async fn test_empty_chunks_use_fallback_without_calling_completion() {
        let mock = Arc::new(MockCompletion::with_reply("should not appear"));
        let synth = ResponseSynthesizer::new(mock.clone(), 10);

        let attrs = HashMap::new();
        let out = synth
            .synthesize(input("I feel stuck", &[], &attrs, &[], false))
            .await;

        assert!(out.text.starts_with(FALLBACK_RESPONSE));
        assert!(out.used_chunks.is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_completion_failure_degrades_to_fallback() {
        let synth = ResponseSynthesizer::new(Arc::new(MockCompletion::failing()), 10);
        let chunks = vec![chunk("anxiety_0", "anxiety", "breathing exercises help")];
        let attrs = HashMap::new();

        let out = synth
            .synthesize(input("anxious lately", &chunks, &attrs, &[], false))
            .await;

        assert!(out.text.starts_with(FALLBACK_RESPONSE));
        assert!(out.used_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_grounded_reply_records_used_chunk_ids() {
        let synth = ResponseSynthesizer::new(
            Arc::new(MockCompletion::with_reply("Deep breathing can help.")),
            10,
        );
        let chunks = vec![
            chunk("anxiety_0", "anxiety", "box breathing"),
            chunk("anxiety_1", "anxiety", "grounding techniques"),
        ];
        let attrs = HashMap::new();

        let out = synth
            .synthesize(input("how do I calm down", &chunks, &attrs, &[], false))
            .await;

        assert!(out.text.starts_with("Deep breathing can help."));
        assert_eq!(out.used_chunks, vec!["anxiety_0", "anxiety_1"]);
    }

    #[tokio::test]
    async fn test_first_assistant_turn_gets_initial_disclaimer_once() {
        let synth =
            ResponseSynthesizer::new(Arc::new(MockCompletion::with_reply("Here to help.")), 10);
        let chunks = vec![chunk("faq_0", "faq", "general support info")];
        let attrs = HashMap::new();

        let out = synth
            .synthesize(input("hello, rough week", &chunks, &attrs, &[], true))
            .await;

        assert_eq!(out.text.matches("IMPORTANT: I'm an AI chatbot").count(), 1);
        assert!(!out.text.contains(SESSION_DISCLAIMER));
    }

    #[tokio::test]
    async fn test_medical_topic_gets_session_disclaimer_on_later_turns() {
        let synth =
            ResponseSynthesizer::new(Arc::new(MockCompletion::with_reply("Worth discussing.")), 10);
        let chunks = vec![chunk("faq_0", "faq", "general support info")];
        let attrs = HashMap::new();

        let out = synth
            .synthesize(input(
                "my therapist suggested journaling",
                &chunks,
                &attrs,
                &[],
                false,
            ))
            .await;

        assert!(out.text.contains(SESSION_DISCLAIMER));
        assert!(!out.text.contains("IMPORTANT: I'm an AI chatbot"));
    }

    #[tokio::test]
    async fn test_neutral_later_turns_get_no_disclaimer() {
        let synth =
            ResponseSynthesizer::new(Arc::new(MockCompletion::with_reply("That sounds hard.")), 10);
        let chunks = vec![chunk("faq_0", "faq", "general support info")];
        let attrs = HashMap::new();

        let out = synth
            .synthesize(input("work was stressful today", &chunks, &attrs, &[], false))
            .await;

        assert_eq!(out.text, "That sounds hard.");
    }

    #[tokio::test]
    async fn test_first_turn_on_medical_topic_gets_only_initial_disclaimer() {
        let synth = ResponseSynthesizer::new(Arc::new(MockCompletion::with_reply("Let's talk.")), 10);
        let chunks = vec![chunk("faq_0", "faq", "general support info")];
        let attrs = HashMap::new();

        let out = synth
            .synthesize(input(
                "my psychiatrist moved away and I feel lost",
                &chunks,
                &attrs,
                &[],
                true,
            ))
            .await;

        assert!(out.text.contains("IMPORTANT: I'm an AI chatbot"));
        assert!(!out.text.contains(SESSION_DISCLAIMER));
    }

    #[test]
    fn test_prompt_bounds_history_and_labels_context() {
        let synth = ResponseSynthesizer::new(Arc::new(MockCompletion::new()), 4);
        let chunks = vec![chunk("sleep_0", "sleep", "keep a regular schedule")];
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), "Sam".to_string());
        attrs.insert("feelings".to_string(), "anxious".to_string());

        let mut history = Vec::new();
        for i in 0..9 {
            history.push(Turn::user(format!("user message {}", i)));
            history.push(Turn::assistant(format!("assistant message {}", i)));
        }
        history.push(Turn::system("internal notice"));

        let inp = input("can't sleep lately", &chunks, &attrs, &history, false);
        let messages = synth.build_messages(&inp);

        // system + 最近 4 条对话 + 当前消息
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("EMPATHETIC TONE GUIDELINES"));
        assert!(messages[0].content.contains("- feelings: anxious"));
        assert!(messages[0].content.contains("- name: Sam"));
        assert!(messages[0].content.contains("Document 1 (from sleep)"));
        // 截断保留最近的，system 轮次不进上下文
        assert_eq!(messages[1].content, "user message 7");
        assert_eq!(messages[4].content, "assistant message 8");
        assert_eq!(messages[5].content, "can't sleep lately");
    }
}
