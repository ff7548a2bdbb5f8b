//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化 tracing 订阅器：RUST_LOG 优先，默认 solace=info
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("solace=info".parse().unwrap()))
        .with(fmt::layer())
        .init();
}
