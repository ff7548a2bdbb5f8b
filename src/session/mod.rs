//! 会话层：轮次历史、用户属性、危机状态与可切换的存储后端

pub mod attributes;
pub mod sqlite;
pub mod store;
pub mod turn;

pub use attributes::AttributeExtractor;
pub use store::{
    create_session_store, CrisisState, MemorySessionStore, SessionId, SessionMeta, SessionStore,
    SessionSummary,
};
pub use turn::{now_millis, Role, Turn};

#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteSessionStore;
