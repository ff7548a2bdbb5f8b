//! WebSocket 通道与会话 REST 面集成测试

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsFrame;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use solace::capability::{EmbeddingClient, MockCompletion, MockEmbedding, MockModeration};
    use solace::corpus::{Chunk, GroundingRetriever};
    use solace::pipeline::{
        CrisisDetector, EthicsGate, OutboundEvent, ResponseSynthesizer, SessionRouter,
    };
    use solace::server::{build_router, AppState, ChannelRegistry};
    use solace::session::{MemorySessionStore, SessionStore};

    type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    /// 随机端口起一个完整服务（全 Mock 能力 + 单文档语料）
    async fn spawn_server() -> SocketAddr {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let embedder = Arc::new(MockEmbedding::new());
        let chunks = vec![Chunk {
            id: "coping_0".to_string(),
            text: "Box breathing, four counts in and four counts out, settles the body."
                .to_string(),
            source: "coping".to_string(),
            offset: 0,
        }];
        let mut vectors = Vec::new();
        for c in &chunks {
            vectors.push(embedder.embed(&c.text).await.unwrap());
        }
        let retriever = Arc::new(GroundingRetriever::with_chunks(embedder, chunks, vectors));

        let router = Arc::new(SessionRouter::new(
            store.clone(),
            CrisisDetector::new("US", 2),
            EthicsGate::new(Arc::new(MockModeration::allow_all())),
            retriever,
            ResponseSynthesizer::new(Arc::new(MockCompletion::with_reply("I'm listening.")), 10),
            1,
        ));
        let state = Arc::new(AppState {
            store,
            router,
            channels: ChannelRegistry::new(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr, session_id: &str) -> WsClient {
        let url = format!("ws://{}/ws/{}", addr, session_id);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    /// 下一个文本帧解析为事件，5 秒不到则失败
    async fn next_event(ws: &mut WsClient) -> OutboundEvent {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream closed unexpectedly")
                .expect("websocket error");
            if let WsFrame::Text(text) = frame {
                return serde_json::from_str(&text).expect("unparseable outbound frame");
            }
        }
    }

    fn user_frame(text: &str) -> WsFrame {
        WsFrame::Text(serde_json::json!({ "type": "message", "text": text }).to_string())
    }

    fn ping_frame(timestamp: u64) -> WsFrame {
        WsFrame::Text(serde_json::json!({ "type": "ping", "timestamp": timestamp }).to_string())
    }

    fn assert_bot_message(event: &OutboundEvent, needle: &str) {
        match event {
            OutboundEvent::Message { content, sender, .. } => {
                assert_eq!(sender, "bot");
                assert!(
                    content.contains(needle),
                    "expected {:?} in {:?}",
                    needle,
                    content
                );
            }
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_reports_running_state() {
        let addr = spawn_server().await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].as_u64().unwrap() > 0);
        assert_eq!(body["active_connections"], 0);
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_rest_session_lifecycle() {
        let addr = spawn_server().await;
        let client = reqwest::Client::new();

        // 创建：返回问候语，问候语同时落为首条助手轮次
        let created: serde_json::Value = client
            .post(format!("http://{}/api/sessions", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session_id = created["session_id"].as_str().unwrap().to_string();
        assert!(session_id.starts_with("session_"));
        assert!(created["initial_message"]
            .as_str()
            .unwrap()
            .contains("IMPORTANT: I'm an AI chatbot"));

        let detail: serde_json::Value = client
            .get(format!("http://{}/api/sessions/{}", addr, session_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let messages = detail["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "assistant");

        // 列表是 id -> 摘要 的映射
        let listing: serde_json::Value = client
            .get(format!("http://{}/api/sessions", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(listing.get(&session_id).is_some());
        assert_eq!(listing[&session_id]["message_count"], 1);

        // 清空保留会话本身
        let cleared: serde_json::Value = client
            .post(format!("http://{}/api/sessions/{}/clear", addr, session_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cleared["status"], "cleared");

        let detail: serde_json::Value = client
            .get(format!("http://{}/api/sessions/{}", addr, session_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(detail["messages"].as_array().unwrap().is_empty());

        // 未知会话的读取与清空都是 404
        let missing = client
            .get(format!("http://{}/api/sessions/no-such-session", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let missing = client
            .post(format!("http://{}/api/sessions/no-such-session/clear", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_greets_fresh_session_then_replies() {
        let addr = spawn_server().await;
        let mut ws = connect(addr, "ws-greet").await;

        // 空会话先拿到问候
        let greeting = next_event(&mut ws).await;
        assert_bot_message(&greeting, "IMPORTANT: I'm an AI chatbot");

        ws.send(user_frame("I've been anxious about work lately"))
            .await
            .unwrap();

        assert_eq!(next_event(&mut ws).await, OutboundEvent::TypingStart);
        assert_eq!(next_event(&mut ws).await, OutboundEvent::TypingStop);
        let reply = next_event(&mut ws).await;
        assert_bot_message(&reply, "I'm listening.");
        match &reply {
            OutboundEvent::Message { grounding, .. } => assert!(!grounding.is_empty()),
            _ => unreachable!(),
        }

        ws.close(None).await.ok();
    }

    #[tokio::test]
    async fn test_ws_malformed_frame_dropped_connection_stays() {
        let addr = spawn_server().await;
        let mut ws = connect(addr, "ws-bad").await;
        next_event(&mut ws).await;

        // 坏帧丢弃不回包；紧随其后的 ping 仍然应答，证明连接未断
        ws.send(WsFrame::Text("this is not json".to_string()))
            .await
            .unwrap();
        ws.send(WsFrame::Text(r#"{"type":"unknown_kind"}"#.to_string()))
            .await
            .unwrap();
        ws.send(ping_frame(7)).await.unwrap();

        assert_eq!(next_event(&mut ws).await, OutboundEvent::Pong { timestamp: 7 });

        ws.send(user_frame("still here")).await.unwrap();
        assert_eq!(next_event(&mut ws).await, OutboundEvent::TypingStart);

        ws.close(None).await.ok();
    }

    #[tokio::test]
    async fn test_ws_reconnect_skips_greeting_and_keeps_history() {
        let addr = spawn_server().await;

        let mut ws = connect(addr, "ws-reconnect").await;
        next_event(&mut ws).await;
        ws.send(user_frame("rough week, can't slow my thoughts down"))
            .await
            .unwrap();
        for _ in 0..3 {
            next_event(&mut ws).await;
        }
        ws.close(None).await.ok();

        // 重连：有历史的会话不再问候，首个应答帧是 pong
        let mut ws = connect(addr, "ws-reconnect").await;
        ws.send(ping_frame(99)).await.unwrap();
        assert_eq!(next_event(&mut ws).await, OutboundEvent::Pong { timestamp: 99 });

        let detail: serde_json::Value = reqwest::get(format!(
            "http://{}/api/sessions/{}",
            addr, "ws-reconnect"
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(detail["messages"].as_array().unwrap().len(), 2);

        ws.close(None).await.ok();
    }

    #[tokio::test]
    async fn test_ws_ping_echoes_timestamp() {
        let addr = spawn_server().await;
        let mut ws = connect(addr, "ws-ping").await;
        next_event(&mut ws).await;

        ws.send(ping_frame(123456)).await.unwrap();
        assert_eq!(
            next_event(&mut ws).await,
            OutboundEvent::Pong { timestamp: 123456 }
        );

        ws.close(None).await.ok();
    }

    #[tokio::test]
    async fn test_ws_clear_command_resets_history() {
        let addr = spawn_server().await;
        let mut ws = connect(addr, "ws-clear").await;
        next_event(&mut ws).await;

        ws.send(user_frame("my name is Riley")).await.unwrap();
        for _ in 0..3 {
            next_event(&mut ws).await;
        }

        ws.send(user_frame("clear")).await.unwrap();
        match next_event(&mut ws).await {
            OutboundEvent::System { content } => {
                assert_eq!(content, "Conversation history cleared.");
            }
            other => panic!("expected system frame, got {:?}", other),
        }

        let detail: serde_json::Value =
            reqwest::get(format!("http://{}/api/sessions/{}", addr, "ws-clear"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert!(detail["messages"].as_array().unwrap().is_empty());

        ws.close(None).await.ok();
    }

    #[tokio::test]
    async fn test_ws_crisis_frame_precedes_hotline_message() {
        let addr = spawn_server().await;
        let mut ws = connect(addr, "ws-crisis").await;
        next_event(&mut ws).await;

        ws.send(user_frame("I want to end my life")).await.unwrap();

        assert_eq!(next_event(&mut ws).await, OutboundEvent::TypingStart);
        assert_eq!(next_event(&mut ws).await, OutboundEvent::TypingStop);
        assert_eq!(next_event(&mut ws).await, OutboundEvent::Crisis);
        let reply = next_event(&mut ws).await;
        assert_bot_message(&reply, "988");

        ws.close(None).await.ok();
    }
}
