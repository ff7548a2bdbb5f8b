//! 入站帧格式。出站帧即 [`OutboundEvent`]，由管道层定义。

use serde::Deserialize;

pub use crate::pipeline::OutboundEvent;

/// 客户端发来的 WebSocket 帧
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Message {
        text: String,
    },
    /// 客户端保活，原样回 pong
    Ping {
        #[serde(default)]
        timestamp: u64,
    },
}
