//! HTTP/WebSocket 服务面

pub mod api;
pub mod channel;
pub mod wire;

pub use api::{build_router, AppState};
pub use channel::ChannelRegistry;
pub use wire::ClientMessage;
