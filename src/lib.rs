//! Solace - Rust 心理健康支持对话智能体
//!
//! 模块划分：
//! - **capability**: 外部能力抽象（补全 / 向量化 / 内容审核）与 OpenAI / Mock 实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **corpus**: 知识库加载、分块与向量检索
//! - **pipeline**: 每条消息的固定管道（危机检测 → 伦理护栏 → 检索增强合成）
//! - **server**: HTTP/WebSocket 服务面（会话 REST + 实时通道）
//! - **session**: 会话存储（轮次、画像、危机状态），内存 / SQLite 两种后端

pub mod capability;
pub mod config;
pub mod corpus;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod session;

pub use error::SolaceError;
pub use pipeline::{SessionRouter, TurnOutcome};
