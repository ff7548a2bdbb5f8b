//! Solace 服务入口：加载配置、装配管道、启动 HTTP/WebSocket 服务。

use std::sync::Arc;

use solace::capability::create_capabilities;
use solace::config::load_config;
use solace::corpus::load_retriever;
use solace::pipeline::{CrisisDetector, EthicsGate, ResponseSynthesizer, SessionRouter};
use solace::server::{build_router, AppState, ChannelRegistry};
use solace::session::create_session_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    solace::observability::init();

    let cfg = load_config(None).unwrap_or_default();

    let capabilities = create_capabilities(&cfg.provider);
    let retriever = Arc::new(load_retriever(&cfg.corpus, capabilities.embedding.clone()).await);
    let store = create_session_store(cfg.session.db_path.as_deref()).await;

    let router = Arc::new(SessionRouter::new(
        store.clone(),
        CrisisDetector::new(&cfg.crisis.country, cfg.crisis.moderate_threshold),
        EthicsGate::new(capabilities.moderation.clone()),
        retriever,
        ResponseSynthesizer::new(capabilities.completion.clone(), cfg.session.max_context_turns),
        cfg.corpus.top_k,
    ));

    let state = Arc::new(AppState {
        store,
        router,
        channels: ChannelRegistry::new(),
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr).await?;
    tracing::info!("Solace listening on http://{}", cfg.server.bind_addr);
    tracing::info!("Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Shutting down");
    Ok(())
}
