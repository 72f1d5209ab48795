//! 弹性工具调用客户端
//!
//! - **types**: 线协议（请求 / 响应）与调用结果
//! - **breaker**: 单工具熔断器
//! - **cache**: 只读工具响应缓存
//! - **state**: 熔断 / 缓存状态与持久化
//! - **transport**: 进程内 / 子进程 / HTTP 传输
//! - **registry**: 工具 → server → 端点 的静态注册表
//! - **client**: CallClient，把以上组合成一次 call

pub mod breaker;
pub mod cache;
#[allow(clippy::module_inception)]
pub mod client;
pub mod registry;
pub mod state;
pub mod transport;
pub mod types;

pub use breaker::{Breaker, BreakerConfig, BreakerState};
pub use cache::{cache_key, CacheConfig, CacheEntry};
pub use client::{CallClient, CallClientBuilder, ClientConfig};
pub use registry::{EndpointRegistry, EndpointSpec, RegistryError, ServerSpec, ToolSpec};
pub use state::{ClientState, ClientStatePersistence, JsonFilePersistence, MemoryPersistence};
pub use transport::{HttpTransport, InProcessTransport, StdioTransport, Transport, TransportError};
pub use types::{
    CallErrorCode, CallFailure, CallOptions, CallResult, CallSuccess, RpcRequest, RpcResponse,
};
