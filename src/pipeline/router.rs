//! 会话路由：每条消息走固定管道
//!
//! 危机状态机 → 伦理护栏 → 检索 → 合成 → 落库，事件经 UnboundedSender
//! 流出（typing_start 先行，typing_stop 严格在最终消息之前）。同一会话
//! 的轮次经 per-session 闸门串行化，历史追加顺序即对话顺序。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::corpus::GroundingRetriever;
use crate::error::SolaceError;
use crate::session::{now_millis, Role, SessionStore, Turn};

use super::crisis::{CrisisAction, CrisisDetector};
use super::ethics::{EthicsGate, GateDecision};
use super::synthesizer::{ResponseSynthesizer, SynthesisInput};

/// 处理中途出错时发给用户的通知
const ERROR_NOTICE: &str = "I'm sorry, I encountered an error while processing your \
message. Please try again or contact support if the issue persists.";

/// 推送给客户端的事件（即 WebSocket 帧格式）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    TypingStart,
    TypingStop,
    Message {
        content: String,
        sender: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        grounding: Vec<String>,
        timestamp: u64,
    },
    Crisis,
    System {
        content: String,
    },
    Pong {
        timestamp: u64,
    },
}

impl OutboundEvent {
    /// 机器人消息帧，sender 固定为 "bot"
    pub fn bot_message(content: String, grounding: Vec<String>, timestamp: u64) -> Self {
        OutboundEvent::Message {
            content,
            sender: "bot".to_string(),
            grounding,
            timestamp,
        }
    }
}

/// 事件出口。断连后发送失败是正常情况，事件直接丢弃。
pub type EventSink = mpsc::UnboundedSender<OutboundEvent>;

/// 一轮处理的终态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 空白输入，未产生任何事件
    Ignored,
    /// 危机触发，已发热线资源
    Crisis,
    /// 危机跟进中，已发 check-in
    CheckIn,
    /// 审核拦截
    Blocked,
    /// 医疗建议重定向
    MedicalRedirect,
    /// 正常生成回复
    Answered,
    /// 存储硬失败，已发系统通知
    Failed,
}

/// 会话路由器
pub struct SessionRouter {
    store: Arc<dyn SessionStore>,
    detector: CrisisDetector,
    gate: EthicsGate,
    retriever: Arc<GroundingRetriever>,
    synthesizer: ResponseSynthesizer,
    top_k: usize,
    turn_gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRouter {
    pub fn new(
        store: Arc<dyn SessionStore>,
        detector: CrisisDetector,
        gate: EthicsGate,
        retriever: Arc<GroundingRetriever>,
        synthesizer: ResponseSynthesizer,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            detector,
            gate,
            retriever,
            synthesizer,
            top_k,
            turn_gates: Mutex::new(HashMap::new()),
        }
    }

    /// 处理一条入站消息。事件顺序：typing_start，然后恰好一次
    /// typing_stop，然后终态事件（message / crisis+message /
    /// system）。返回前所有轮次已落库。
    pub async fn handle_inbound(
        &self,
        session_id: &str,
        raw_text: &str,
        events: &EventSink,
    ) -> TurnOutcome {
        let text = raw_text.trim();
        if text.is_empty() {
            return TurnOutcome::Ignored;
        }

        // 同一会话串行处理，保证历史顺序与事件顺序一致
        let gate = self.turn_gate(session_id).await;
        let _serialized = gate.lock().await;

        self.store.get_or_create(session_id).await;
        events.send(OutboundEvent::TypingStart).ok();
        tracing::info!(session_id, "processing message");

        // 危机状态机先行，命中即短路
        let state = self.store.crisis_state(session_id).await;
        let step = self.detector.step(state, text);
        if step.next != state {
            self.store.set_crisis_state(session_id, step.next).await;
        }
        match step.action {
            CrisisAction::Triggered => {
                tracing::warn!(session_id, "crisis detected in user message");
                let reply = self.detector.crisis_response();
                if let Err(e) = self.record_exchange(session_id, text, &reply, Vec::new()).await {
                    return self.fail(events, e);
                }
                events.send(OutboundEvent::TypingStop).ok();
                events.send(OutboundEvent::Crisis).ok();
                events
                    .send(OutboundEvent::bot_message(reply, Vec::new(), now_millis()))
                    .ok();
                return TurnOutcome::Crisis;
            }
            CrisisAction::CheckIn => {
                let reply = self.detector.check_in_message();
                if let Err(e) = self.record_exchange(session_id, text, &reply, Vec::new()).await {
                    return self.fail(events, e);
                }
                events.send(OutboundEvent::TypingStop).ok();
                events
                    .send(OutboundEvent::bot_message(reply, Vec::new(), now_millis()))
                    .ok();
                return TurnOutcome::CheckIn;
            }
            CrisisAction::Cleared | CrisisAction::None => {}
        }

        // 伦理护栏：拦截与重定向的回复是固定文本，不经过生成
        match self.gate.screen(text).await {
            GateDecision::Blocked { reply } => {
                if let Err(e) = self.record_exchange(session_id, text, &reply, Vec::new()).await {
                    return self.fail(events, e);
                }
                events.send(OutboundEvent::TypingStop).ok();
                events
                    .send(OutboundEvent::bot_message(reply, Vec::new(), now_millis()))
                    .ok();
                return TurnOutcome::Blocked;
            }
            GateDecision::MedicalRedirect { reply } => {
                if let Err(e) = self.record_exchange(session_id, text, &reply, Vec::new()).await {
                    return self.fail(events, e);
                }
                events.send(OutboundEvent::TypingStop).ok();
                events
                    .send(OutboundEvent::bot_message(reply, Vec::new(), now_millis()))
                    .ok();
                return TurnOutcome::MedicalRedirect;
            }
            GateDecision::Pass => {}
        }

        // 历史快照在落用户轮次之前取，当前消息单独传给合成器；
        // 画像在抽取之后取，本条消息里的细节当轮就能用上
        let history = self.store.history(session_id).await.unwrap_or_default();
        let first_assistant_turn = !history.iter().any(|t| t.role == Role::Assistant);

        if let Err(e) = self.store.append(session_id, Turn::user(text)).await {
            return self.fail(events, e);
        }
        self.store.extract_and_merge_attributes(session_id, text).await;
        let attributes = self.store.attributes(session_id).await;

        let chunks = self.retriever.retrieve(text, self.top_k).await;
        let synthesis = self
            .synthesizer
            .synthesize(SynthesisInput {
                user_text: text,
                chunks: &chunks,
                attributes: &attributes,
                history: &history,
                first_assistant_turn,
            })
            .await;

        let reply_turn =
            Turn::assistant(synthesis.text.as_str()).with_grounding(synthesis.used_chunks.clone());
        let timestamp = reply_turn.timestamp;
        if let Err(e) = self.store.append(session_id, reply_turn).await {
            return self.fail(events, e);
        }

        events.send(OutboundEvent::TypingStop).ok();
        events
            .send(OutboundEvent::bot_message(
                synthesis.text,
                synthesis.used_chunks,
                timestamp,
            ))
            .ok();
        TurnOutcome::Answered
    }

    /// 固定回复路径的落库：用户轮次 + 画像抽取 + 助手轮次
    async fn record_exchange(
        &self,
        session_id: &str,
        user_text: &str,
        reply: &str,
        grounding: Vec<String>,
    ) -> Result<(), SolaceError> {
        self.store.append(session_id, Turn::user(user_text)).await?;
        self.store
            .extract_and_merge_attributes(session_id, user_text)
            .await;
        self.store
            .append(session_id, Turn::assistant(reply).with_grounding(grounding))
            .await
    }

    fn fail(&self, events: &EventSink, err: SolaceError) -> TurnOutcome {
        tracing::error!("turn aborted, session state may be incomplete: {}", err);
        events.send(OutboundEvent::TypingStop).ok();
        events
            .send(OutboundEvent::System {
                content: ERROR_NOTICE.to_string(),
            })
            .ok();
        TurnOutcome::Failed
    }

    async fn turn_gate(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut gates = self.turn_gates.lock().await;
        gates
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
