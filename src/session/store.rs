//! 会话存储抽象层
//!
//! 定义统一的会话管理接口，支持内存和 SQLite 两种实现。历史只追加、
//! 顺序即追加顺序；属性表 last-write-wins；clear 保留 id 与 created_at。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use super::attributes::AttributeExtractor;
use super::turn::{now_millis, Role, Turn};
use crate::error::SolaceError;

pub type SessionId = String;

/// 危机状态机的三个状态（见 pipeline::crisis）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CrisisState {
    #[default]
    Normal,
    CrisisActive,
    FollowupPending,
}

/// 会话元数据
#[derive(Clone, Debug, Serialize)]
pub struct SessionMeta {
    pub id: SessionId,
    /// RFC 3339
    pub created_at: String,
}

/// 会话列表条目
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    /// 最新一条消息的 Unix 毫秒；无消息时为创建时间
    pub last_updated: u64,
}

/// 标题取首条用户消息的前 30 字符
const TITLE_MAX_CHARS: usize = 30;
const DEFAULT_TITLE: &str = "New conversation";

pub(crate) fn derive_title(first_user_content: &str) -> String {
    let trimmed = first_user_content.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        trimmed.to_string()
    }
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 附着或创建指定 ID 的会话
    async fn get_or_create(&self, session_id: &str) -> SessionMeta;

    /// 创建新会话（生成 session_<uuid> ID）
    async fn create(&self) -> SessionMeta;

    /// 追加一条轮次；会话不存在时报错
    async fn append(&self, session_id: &str, turn: Turn) -> Result<(), SolaceError>;

    /// 完整历史（追加顺序）；未知会话返回 None
    async fn history(&self, session_id: &str) -> Option<Vec<Turn>>;

    /// 对一条用户消息跑属性抽取并合并（last-write-wins）
    async fn extract_and_merge_attributes(&self, session_id: &str, user_text: &str);

    /// 当前属性快照
    async fn attributes(&self, session_id: &str) -> HashMap<String, String>;

    /// 危机状态读写
    async fn crisis_state(&self, session_id: &str) -> CrisisState;
    async fn set_crisis_state(&self, session_id: &str, state: CrisisState);

    /// 清空历史与属性，保留 id/created_at，危机状态复位；未知会话返回 false
    async fn clear(&self, session_id: &str) -> bool;

    /// 会话列表（标题、消息数、最近更新时间）
    async fn summaries(&self) -> Vec<SessionSummary>;

    /// 会话总数
    async fn session_count(&self) -> usize;
}

/// 单个会话的内部状态
struct SessionRecord {
    meta: SessionMeta,
    created_millis: u64,
    title: Option<String>,
    turns: Vec<Turn>,
    attributes: HashMap<String, String>,
    crisis_state: CrisisState,
}

impl SessionRecord {
    fn new(id: String) -> Self {
        Self {
            meta: SessionMeta {
                id,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            created_millis: now_millis(),
            title: None,
            turns: Vec::new(),
            attributes: HashMap::new(),
            crisis_state: CrisisState::Normal,
        }
    }

    fn push(&mut self, turn: Turn) {
        if self.title.is_none() && turn.role == Role::User {
            self.title = Some(derive_title(&turn.content));
        }
        self.turns.push(turn);
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.meta.id.clone(),
            title: self.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            message_count: self.turns.len(),
            last_updated: self
                .turns
                .last()
                .map(|t| t.timestamp)
                .unwrap_or(self.created_millis),
        }
    }
}

/// 内存会话存储（默认实现）
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    extractor: AttributeExtractor,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            extractor: AttributeExtractor::new(),
        }
    }

    async fn with_session<F, R>(&self, session_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut SessionRecord) -> R,
    {
        self.sessions.write().await.get_mut(session_id).map(f)
    }

    /// 数据库恢复用：按持久化的元数据重建会话（标题从轮次重新推导）
    #[cfg(feature = "async-sqlite")]
    pub(crate) async fn restore(
        &self,
        meta: SessionMeta,
        created_millis: u64,
        turns: Vec<Turn>,
        attributes: HashMap<String, String>,
        crisis_state: CrisisState,
    ) {
        let mut record = SessionRecord {
            meta: meta.clone(),
            created_millis,
            title: None,
            turns: Vec::new(),
            attributes,
            crisis_state,
        };
        for turn in turns {
            record.push(turn);
        }
        self.sessions.write().await.insert(meta.id, record);
    }

    /// 会话是否存在（不创建）
    #[cfg(feature = "async-sqlite")]
    pub(crate) async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> SessionMeta {
        if let Some(record) = self.sessions.read().await.get(session_id) {
            return record.meta.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(session_id.to_string()))
            .meta
            .clone()
    }

    async fn create(&self) -> SessionMeta {
        let id = format!("session_{}", uuid::Uuid::new_v4());
        self.get_or_create(&id).await
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<(), SolaceError> {
        self.with_session(session_id, |s| s.push(turn))
            .await
            .ok_or_else(|| SolaceError::SessionNotFound(session_id.to_string()))
    }

    async fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.turns.clone())
    }

    async fn extract_and_merge_attributes(&self, session_id: &str, user_text: &str) {
        let extracted = self.extractor.extract(user_text);
        if extracted.is_empty() {
            return;
        }
        self.with_session(session_id, |s| {
            for (key, value) in extracted {
                s.attributes.insert(key, value);
            }
        })
        .await;
    }

    async fn attributes(&self, session_id: &str) -> HashMap<String, String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.attributes.clone())
            .unwrap_or_default()
    }

    async fn crisis_state(&self, session_id: &str) -> CrisisState {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.crisis_state)
            .unwrap_or_default()
    }

    async fn set_crisis_state(&self, session_id: &str, state: CrisisState) {
        self.with_session(session_id, |s| s.crisis_state = state).await;
    }

    async fn clear(&self, session_id: &str) -> bool {
        self.with_session(session_id, |s| {
            s.turns.clear();
            s.attributes.clear();
            s.title = None;
            s.crisis_state = CrisisState::Normal;
        })
        .await
        .is_some()
    }

    async fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionSummary> = sessions.values().map(|s| s.summary()).collect();
        list.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        list
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// 创建会话存储
///
/// 如果提供了 db_path 且启用了 async-sqlite feature，则使用持久化存储；否则使用内存存储
pub async fn create_session_store(db_path: Option<&std::path::Path>) -> Arc<dyn SessionStore> {
    #[cfg(feature = "async-sqlite")]
    if let Some(path) = db_path {
        match super::sqlite::SqliteSessionStore::new(path).await {
            Ok(store) => {
                tracing::info!("Using persistent session store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open session database, falling back to memory: {}", e);
            }
        }
    }

    #[cfg(not(feature = "async-sqlite"))]
    if db_path.is_some() {
        tracing::warn!("Session db_path set but async-sqlite feature not enabled, using memory store");
    }

    tracing::info!("Using in-memory session store");
    Arc::new(MemorySessionStore::new())
}
