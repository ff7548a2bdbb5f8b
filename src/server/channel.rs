//! WebSocket 通道：/ws/:session_id
//!
//! 每个连接一个任务，读循环内联跑管道（socket 即队列，同会话天然
//! 串行）。同一会话再次连接时注册表 newest-wins，旧连接不再计入
//! active_connections，自然读到 EOF 退出。客户端中途断开时当前轮
//! 照常落库，事件发不出去就丢弃。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};

use crate::pipeline::ethics::INITIAL_DISCLAIMER;
use crate::session::now_millis;

use super::api::AppState;
use super::wire::{ClientMessage, OutboundEvent};

/// 在线连接注册表：session_id -> 连接序号
#[derive(Default)]
pub struct ChannelRegistry {
    connections: RwLock<HashMap<String, u64>>,
    next_conn_id: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接并返回序号，同会话旧条目直接顶掉
    pub async fn attach(&self, session_id: &str) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections
            .write()
            .await
            .insert(session_id.to_string(), conn_id);
        conn_id
    }

    /// 注销连接。条目已被更新的连接顶掉时不动它。
    pub async fn detach(&self, session_id: &str, conn_id: u64) {
        let mut connections = self.connections.write().await;
        if connections.get(session_id) == Some(&conn_id) {
            connections.remove(session_id);
        }
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// GET /ws/:session_id 升级入口
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let conn_id = state.channels.attach(&session_id).await;
    tracing::info!(session_id = %session_id, conn_id, "websocket client connected");

    state.store.get_or_create(&session_id).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<OutboundEvent>();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 写端：事件序列化为文本帧，socket 已关就退出
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("failed to serialize outbound event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // 空会话先发问候（含完整声明），不落库：重连到已有历史的会话不重复问候
    let history_len = state
        .store
        .history(&session_id)
        .await
        .map(|h| h.len())
        .unwrap_or(0);
    if history_len == 0 {
        events_tx
            .send(OutboundEvent::bot_message(
                INITIAL_DISCLAIMER.to_string(),
                Vec::new(),
                now_millis(),
            ))
            .ok();
    }

    while let Some(Ok(frame)) = ws_rx.next().await {
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Message { text }) => {
                    // 会话内快捷命令：清空历史
                    if text.trim().eq_ignore_ascii_case("clear") {
                        state.store.clear(&session_id).await;
                        events_tx
                            .send(OutboundEvent::System {
                                content: "Conversation history cleared.".to_string(),
                            })
                            .ok();
                        continue;
                    }
                    state.router.handle_inbound(&session_id, &text, &events_tx).await;
                }
                Ok(ClientMessage::Ping { timestamp }) => {
                    events_tx.send(OutboundEvent::Pong { timestamp }).ok();
                }
                // 格式不对的帧丢弃不回包，连接保持
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "dropping malformed frame: {}", e);
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    drop(events_tx);
    writer.await.ok();
    state.channels.detach(&session_id, conn_id).await;
    tracing::info!(session_id = %session_id, conn_id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attach_replaces_previous_connection() {
        let registry = ChannelRegistry::new();
        let first = registry.attach("s1").await;
        assert_eq!(registry.active_connections().await, 1);

        let second = registry.attach("s1").await;
        assert_ne!(first, second);
        assert_eq!(registry.active_connections().await, 1);

        // 旧连接注销不能移除新条目
        registry.detach("s1", first).await;
        assert_eq!(registry.active_connections().await, 1);

        registry.detach("s1", second).await;
        assert_eq!(registry.active_connections().await, 0);
    }

    #[tokio::test]
    async fn test_connections_count_across_sessions() {
        let registry = ChannelRegistry::new();
        let a = registry.attach("a").await;
        let _b = registry.attach("b").await;
        assert_eq!(registry.active_connections().await, 2);

        registry.detach("a", a).await;
        assert_eq!(registry.active_connections().await, 1);
    }
}
