//! 消息处理管道：危机检测 → 伦理护栏 → 检索增强合成
//!
//! 入口是 [`SessionRouter::handle_inbound`]，各阶段本身无状态，
//! 会话状态全部经由存储层读写。

pub mod crisis;
pub mod ethics;
pub mod router;
pub mod synthesizer;

pub use crisis::{CrisisAction, CrisisDetector, CrisisStep, Hotline};
pub use ethics::{EthicsGate, GateDecision};
pub use router::{EventSink, OutboundEvent, SessionRouter, TurnOutcome};
pub use synthesizer::{ResponseSynthesizer, Synthesis, SynthesisInput};
