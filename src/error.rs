//! 统一错误类型
//!
//! 管道内部对外部能力失败做降级处理（见 pipeline::router），这里只保留
//! 真正需要上抛的硬错误：存储失败、会话不存在、配置错误。

use thiserror::Error;

/// 管道与存储层错误
#[derive(Error, Debug)]
pub enum SolaceError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Config error: {0}")]
    Config(String),
}
