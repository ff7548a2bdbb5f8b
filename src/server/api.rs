//! 会话管理 REST 面 + 路由装配
//!
//! GET  /health                      运行状态
//! POST /api/sessions                建会话，返回问候语
//! GET  /api/sessions                会话摘要表（id -> 摘要）
//! GET  /api/sessions/:id            完整历史与画像
//! POST /api/sessions/:id/clear      清空历史（保留会话）
//! GET  /ws/:session_id              WebSocket 升级

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::pipeline::ethics::INITIAL_DISCLAIMER;
use crate::pipeline::SessionRouter;
use crate::session::{now_millis, SessionStore, SessionSummary, Turn};

use super::channel::{ws_handler, ChannelRegistry};

/// 各 handler 共享的应用状态
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub router: Arc<SessionRouter>,
    pub channels: ChannelRegistry,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/clear", post(clear_session))
        .route("/ws/:session_id", get(ws_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: u64,
    active_connections: usize,
    sessions: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: now_millis(),
        active_connections: state.channels.active_connections().await,
        sessions: state.store.session_count().await,
    })
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: String,
    created_at: String,
    initial_message: String,
}

/// 建会话时把问候语落成首条助手轮次，REST 创建的会话在历史里就能
/// 看到声明，后续首条生成回复不再重复附完整声明
async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CreateSessionResponse>, (StatusCode, String)> {
    let meta = state.store.create().await;
    state
        .store
        .append(&meta.id, Turn::assistant(INITIAL_DISCLAIMER))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(session_id = %meta.id, "session created");
    Ok(Json(CreateSessionResponse {
        session_id: meta.id,
        created_at: meta.created_at,
        initial_message: INITIAL_DISCLAIMER.to_string(),
    }))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Json<HashMap<String, SessionSummary>> {
    let map = state
        .store
        .summaries()
        .await
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();
    Json(map)
}

#[derive(Serialize)]
struct SessionDetailResponse {
    session_id: String,
    messages: Vec<Turn>,
    attributes: HashMap<String, String>,
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetailResponse>, (StatusCode, String)> {
    let messages = state
        .store
        .history(&id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("session not found: {}", id)))?;
    let attributes = state.store.attributes(&id).await;
    Ok(Json(SessionDetailResponse {
        session_id: id,
        messages,
        attributes,
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
}

async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ClearResponse>, (StatusCode, String)> {
    if state.store.clear(&id).await {
        tracing::info!(session_id = %id, "session history cleared");
        Ok(Json(ClearResponse { status: "cleared" }))
    } else {
        Err((StatusCode::NOT_FOUND, format!("session not found: {}", id)))
    }
}
