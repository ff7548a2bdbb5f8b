//! Solace REPL - 终端单会话对话
//!
//! 运行: cargo run --bin solace-repl
//! 命令: clear 清空历史，exit / quit / bye 结束对话

use std::io::{BufRead, Write};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use solace::capability::create_capabilities;
use solace::config::load_config;
use solace::corpus::load_retriever;
use solace::pipeline::ethics::INITIAL_DISCLAIMER;
use solace::pipeline::{
    CrisisDetector, EthicsGate, OutboundEvent, ResponseSynthesizer, SessionRouter,
};
use solace::session::{create_session_store, Turn};

const FAREWELL: &str = "Thank you for talking with me. Take care of yourself, and \
remember that professional help is available if you need it.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志默认静音，RUST_LOG 打开后走 stderr，不跟对话输出混在一起
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config(None).unwrap_or_default();

    let capabilities = create_capabilities(&cfg.provider);
    let retriever = Arc::new(load_retriever(&cfg.corpus, capabilities.embedding.clone()).await);
    let store = create_session_store(cfg.session.db_path.as_deref()).await;

    let router = SessionRouter::new(
        store.clone(),
        CrisisDetector::new(&cfg.crisis.country, cfg.crisis.moderate_threshold),
        EthicsGate::new(capabilities.moderation.clone()),
        retriever,
        ResponseSynthesizer::new(capabilities.completion.clone(), cfg.session.max_context_turns),
        cfg.corpus.top_k,
    );

    // 问候落成首条助手轮次，和 REST 建会话保持一致
    let meta = store.create().await;
    if let Err(e) = store.append(&meta.id, Turn::assistant(INITIAL_DISCLAIMER)).await {
        tracing::warn!("failed to record greeting: {}", e);
    }
    println!("\nSolace: {}", INITIAL_DISCLAIMER);
    println!("\nType 'exit', 'quit', or 'bye' to end the conversation.");

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if ["exit", "quit", "bye"].contains(&input.to_lowercase().as_str()) {
            println!("\nSolace: {}", FAREWELL);
            break;
        }
        if input.eq_ignore_ascii_case("clear") {
            store.clear(&meta.id).await;
            println!("\n[Conversation history cleared.]");
            continue;
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        router.handle_inbound(&meta.id, input, &events_tx).await;
        drop(events_tx);

        while let Some(event) = events_rx.recv().await {
            match event {
                OutboundEvent::Message { content, .. } => println!("\nSolace: {}", content),
                OutboundEvent::System { content } => println!("\n[{}]", content),
                _ => {}
            }
        }
    }

    Ok(())
}
