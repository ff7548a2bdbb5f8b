//! 伦理护栏：内容审核 + 医疗建议重定向
//!
//! 两道检查按序执行：先走 Moderation API（失败时 fail-open 放行，
//! 只记日志），再做医疗关键词匹配。医疗模式带词边界，substring
//! 匹配会把 "mental health" 里的 heal 误判成医疗请求。

use std::sync::Arc;

use regex::Regex;

use crate::capability::ModerationClient;

/// 会话首条助手回复附带的完整声明
pub const INITIAL_DISCLAIMER: &str = "IMPORTANT: I'm an AI chatbot designed to provide \
general mental health support and information. I am not a substitute for professional \
mental health care. For urgent issues, please contact a licensed therapist, counselor, \
or crisis hotline.\n\nHow can I support you today?";

/// 后续回复里按需附带的简短声明
pub const SESSION_DISCLAIMER: &str = "Note: I'm an AI here to provide general support, \
not a substitute for professional care. For urgent issues, please contact a licensed \
therapist or crisis hotline.";

/// 医疗建议重定向文本
pub const MEDICAL_ADVICE_REDIRECTION: &str = "I'm not qualified to provide medical advice, \
diagnose conditions, or prescribe treatments. For medical concerns, please consult with a \
healthcare provider who can give you proper evaluation and treatment options.\n\nI can \
still provide general information about mental health topics and coping strategies if \
that would be helpful.";

/// 医疗建议请求模式（小写匹配）
const MEDICAL_PATTERNS: &[&str] = &[
    r"\bdiagnos(?:e|is|ed|ing)\b",
    r"\bmedications?\b",
    r"\bprescri(?:be|bed|bing|ption|ptions)\b",
    r"\btreatments?\b",
    r"\bcures?\b",
    r"\bheal(?:s|ed|ing)?\b",
    r"\bdrugs?\b",
    r"\bdosages?\b",
    r"\bside effects?\b",
    r"\bsymptoms?\b",
    r"\bis it normal\b",
    r"\bdo i have\b",
    r"\bshould i take\b",
    r"\bwhat medicine\b",
];

/// screen 的裁决
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// 放行，进入检索与生成
    Pass,
    /// 审核命中，直接回复拒绝文本
    Blocked { reply: String },
    /// 医疗建议请求，直接回复重定向文本
    MedicalRedirect { reply: String },
}

/// 伦理护栏
pub struct EthicsGate {
    moderation: Arc<dyn ModerationClient>,
    medical: Vec<Regex>,
}

impl EthicsGate {
    pub fn new(moderation: Arc<dyn ModerationClient>) -> Self {
        Self {
            moderation,
            medical: MEDICAL_PATTERNS
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
        }
    }

    /// 筛查一条用户消息。审核服务不可用时放行并继续医疗检查。
    pub async fn screen(&self, text: &str) -> GateDecision {
        match self.moderation.moderate(text).await {
            Ok(verdict) if verdict.flagged => {
                tracing::warn!(
                    categories = ?verdict.categories,
                    "message flagged by moderation"
                );
                return GateDecision::Blocked {
                    reply: moderation_refusal(&verdict.categories),
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("moderation unavailable, continuing without it: {}", e);
            }
        }

        let lower = text.to_lowercase();
        if let Some(re) = self.medical.iter().find(|re| re.is_match(&lower)) {
            tracing::info!(pattern = re.as_str(), "medical advice request detected");
            return GateDecision::MedicalRedirect {
                reply: MEDICAL_ADVICE_REDIRECTION.to_string(),
            };
        }

        GateDecision::Pass
    }
}

/// 审核拒绝文本，列出命中的类别
fn moderation_refusal(categories: &[String]) -> String {
    format!(
        "I'm unable to respond to this message as it contains content that may violate \
         ethical guidelines ({}). As a mental health support chatbot, I'm designed to \
         provide helpful and supportive information in a safe manner.\n\nPlease rephrase \
         your message or ask a different question, and I'll be happy to assist you.",
        categories.join(", ")
    )
}
