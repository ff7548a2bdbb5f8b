//! 持久化会话存储
//!
//! 使用 SQLite 落盘，支持跨重启恢复。写入走内存缓存优先：数据库出错只记日志，
//! 不让当前轮次失败（历史仍在缓存里）。

#![cfg(feature = "async-sqlite")]

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;

use super::store::{
    CrisisState, MemorySessionStore, SessionMeta, SessionStore, SessionSummary,
};
use super::turn::{Role, Turn};
use crate::error::SolaceError;

/// SQLite 会话存储（内存缓存 + 落盘镜像）
pub struct SqliteSessionStore {
    cache: MemorySessionStore,
    pool: sqlx::sqlite::SqlitePool,
}

fn crisis_state_str(state: CrisisState) -> &'static str {
    match state {
        CrisisState::Normal => "normal",
        CrisisState::CrisisActive => "crisis_active",
        CrisisState::FollowupPending => "followup_pending",
    }
}

fn parse_crisis_state(s: &str) -> CrisisState {
    match s {
        "crisis_active" => CrisisState::CrisisActive,
        "followup_pending" => CrisisState::FollowupPending,
        _ => CrisisState::Normal,
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

impl SqliteSessionStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self {
            cache: MemorySessionStore::new(),
            pool,
        };

        store.init_tables().await?;
        store.restore_sessions().await?;

        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                crisis_state TEXT NOT NULL DEFAULT 'normal',
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                grounding TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_attributes (
                session_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 从数据库恢复全部会话到缓存
    async fn restore_sessions(&self) -> Result<(), sqlx::Error> {
        let rows = sqlx::query("SELECT id, created_at, crisis_state FROM sessions")
            .fetch_all(&self.pool)
            .await?;

        let mut restored = 0usize;
        for row in rows {
            let session_id: String = row.get("id");
            let created_at: String = row.get("created_at");
            let crisis_state: String = row.get("crisis_state");

            let created_millis = chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.timestamp_millis() as u64)
                .unwrap_or(0);

            let turns = self.load_turns(&session_id).await?;
            let attributes = self.load_attributes(&session_id).await?;

            self.cache
                .restore(
                    SessionMeta {
                        id: session_id,
                        created_at,
                    },
                    created_millis,
                    turns,
                    attributes,
                    parse_crisis_state(&crisis_state),
                )
                .await;
            restored += 1;
        }

        if restored > 0 {
            tracing::info!("Restored {} sessions from database", restored);
        }

        Ok(())
    }

    async fn load_turns(&self, session_id: &str) -> Result<Vec<Turn>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT role, content, timestamp, grounding FROM turns
             WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::new();
        for row in rows {
            let role_str: String = row.get("role");
            let content: String = row.get("content");
            let timestamp: i64 = row.get("timestamp");
            let grounding: Option<String> = row.get("grounding");

            let role = match role_str.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                "system" => Role::System,
                _ => continue,
            };

            let grounding = grounding
                .and_then(|g| serde_json::from_str::<Vec<String>>(&g).ok())
                .unwrap_or_default();

            turns.push(Turn {
                role,
                content,
                timestamp: timestamp as u64,
                grounding,
            });
        }

        Ok(turns)
    }

    async fn load_attributes(
        &self,
        session_id: &str,
    ) -> Result<HashMap<String, String>, sqlx::Error> {
        let rows = sqlx::query("SELECT key, value FROM session_attributes WHERE session_id = ?")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect())
    }

    async fn save_session_record(&self, meta: &SessionMeta) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, created_at, crisis_state, updated_at)
             VALUES (?, ?, 'normal', ?)",
        )
        .bind(&meta.id)
        .bind(&meta.created_at)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_turn(&self, session_id: &str, turn: &Turn) -> Result<(), sqlx::Error> {
        let grounding = if turn.grounding.is_empty() {
            None
        } else {
            serde_json::to_string(&turn.grounding).ok()
        };
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO turns (session_id, role, content, timestamp, grounding)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role_str(&turn.role))
        .bind(&turn.content)
        .bind(turn.timestamp as i64)
        .bind(grounding)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_attributes(&self, session_id: &str) -> Result<(), sqlx::Error> {
        let attrs = self.cache.attributes(session_id).await;
        for (key, value) in attrs {
            sqlx::query(
                "INSERT OR REPLACE INTO session_attributes (session_id, key, value)
                 VALUES (?, ?, ?)",
            )
            .bind(session_id)
            .bind(&key)
            .bind(&value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_or_create(&self, session_id: &str) -> SessionMeta {
        let existed = self.cache.contains(session_id).await;
        let meta = self.cache.get_or_create(session_id).await;
        if !existed {
            if let Err(e) = self.save_session_record(&meta).await {
                tracing::error!("Failed to persist session: {}", e);
            }
        }
        meta
    }

    async fn create(&self) -> SessionMeta {
        let meta = self.cache.create().await;
        if let Err(e) = self.save_session_record(&meta).await {
            tracing::error!("Failed to persist session: {}", e);
        }
        meta
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<(), SolaceError> {
        self.cache.append(session_id, turn.clone()).await?;
        if let Err(e) = self.save_turn(session_id, &turn).await {
            tracing::error!("Failed to persist turn: {}", e);
        }
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        self.cache.history(session_id).await
    }

    async fn extract_and_merge_attributes(&self, session_id: &str, user_text: &str) {
        self.cache.extract_and_merge_attributes(session_id, user_text).await;
        if let Err(e) = self.save_attributes(session_id).await {
            tracing::error!("Failed to persist attributes: {}", e);
        }
    }

    async fn attributes(&self, session_id: &str) -> HashMap<String, String> {
        self.cache.attributes(session_id).await
    }

    async fn crisis_state(&self, session_id: &str) -> CrisisState {
        self.cache.crisis_state(session_id).await
    }

    async fn set_crisis_state(&self, session_id: &str, state: CrisisState) {
        self.cache.set_crisis_state(session_id, state).await;
        let result = sqlx::query("UPDATE sessions SET crisis_state = ? WHERE id = ?")
            .bind(crisis_state_str(state))
            .bind(session_id)
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            tracing::error!("Failed to persist crisis state: {}", e);
        }
    }

    async fn clear(&self, session_id: &str) -> bool {
        let cleared = self.cache.clear(session_id).await;
        if cleared {
            let wipe = async {
                sqlx::query("DELETE FROM turns WHERE session_id = ?")
                    .bind(session_id)
                    .execute(&self.pool)
                    .await?;
                sqlx::query("DELETE FROM session_attributes WHERE session_id = ?")
                    .bind(session_id)
                    .execute(&self.pool)
                    .await?;
                sqlx::query("UPDATE sessions SET crisis_state = 'normal' WHERE id = ?")
                    .bind(session_id)
                    .execute(&self.pool)
                    .await?;
                Ok::<(), sqlx::Error>(())
            };
            if let Err(e) = wipe.await {
                tracing::error!("Failed to persist clear: {}", e);
            }
        }
        cleared
    }

    async fn summaries(&self) -> Vec<SessionSummary> {
        self.cache.summaries().await
    }

    async fn session_count(&self) -> usize {
        self.cache.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("sessions.db");

        let store = SqliteSessionStore::new(&db_path).await.unwrap();
        let meta = store.get_or_create("s1").await;

        store
            .append("s1", Turn::user("I've been feeling anxious about work"))
            .await
            .unwrap();
        store
            .append(
                "s1",
                Turn::assistant("That sounds hard.").with_grounding(vec!["anxiety_0".into()]),
            )
            .await
            .unwrap();
        store.extract_and_merge_attributes("s1", "my name is Sam").await;
        store.set_crisis_state("s1", CrisisState::FollowupPending).await;
        store.close().await;

        let reopened = SqliteSessionStore::new(&db_path).await.unwrap();
        assert_eq!(reopened.session_count().await, 1);

        let meta2 = reopened.get_or_create("s1").await;
        assert_eq!(meta2.created_at, meta.created_at);

        let history = reopened.history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "I've been feeling anxious about work");
        assert_eq!(history[1].grounding, vec!["anxiety_0".to_string()]);

        let attrs = reopened.attributes("s1").await;
        assert_eq!(attrs.get("name").map(String::as_str), Some("Sam"));
        assert_eq!(reopened.crisis_state("s1").await, CrisisState::FollowupPending);

        let summaries = reopened.summaries().await;
        assert_eq!(summaries[0].title, "I've been feeling anxious abou...");
    }

    #[tokio::test]
    async fn test_clear_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("sessions.db");

        let store = SqliteSessionStore::new(&db_path).await.unwrap();
        store.get_or_create("s1").await;
        store.append("s1", Turn::user("hello")).await.unwrap();
        store.set_crisis_state("s1", CrisisState::CrisisActive).await;
        assert!(store.clear("s1").await);
        store.close().await;

        let reopened = SqliteSessionStore::new(&db_path).await.unwrap();
        assert!(reopened.history("s1").await.unwrap().is_empty());
        assert_eq!(reopened.crisis_state("s1").await, CrisisState::Normal);
    }
}
