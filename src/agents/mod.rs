//! 参考 handler：researcher / coder / critic
//!
//! 都通过 CallClient 调工具，对输出路径加锁写文件，每次工具调用记一条 tool_call 消息；
//! 工具失败时把子任务置为 failed（attempts+1）并写 `<kind>_error` 消息。

pub mod coder;
pub mod critic;
pub mod researcher;
mod support;

use std::sync::Arc;

use crate::client::CallClient;
use crate::supervisor::HandlerRegistry;

pub use coder::Coder;
pub use critic::Critic;
pub use researcher::Researcher;

/// 三个参考 handler 共享同一个客户端（熔断 / 缓存状态随之共享）
pub fn reference_handlers(client: Arc<CallClient>) -> HandlerRegistry {
    HandlerRegistry::new()
        .with(Researcher::new(client.clone()))
        .with(Coder::new(client.clone()))
        .with(Critic::new(client))
}
