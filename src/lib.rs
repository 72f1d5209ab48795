//! Hive - 黑板式多 Agent 调度与弹性工具调用
//!
//! 模块划分：
//! - **agents**: 参考 handler（researcher / coder / critic）
//! - **blackboard**: 持久化共享状态（子任务、产物、消息、事件、锁）
//! - **client**: 弹性工具调用客户端（熔断、缓存、超时、传输）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与时钟
//! - **observability**: 日志初始化
//! - **supervisor**: 单线程调度器
//! - **tools**: 进程内工具（沙箱读写、文档搜索、离线 web_search）

pub mod agents;
pub mod blackboard;
pub mod client;
pub mod config;
pub mod core;
pub mod observability;
pub mod supervisor;
pub mod tools;

pub use blackboard::{FileStateStore, StateStore, StoreOptions, TaskSpec};
pub use client::{CallClient, CallErrorCode, CallFailure, CallSuccess};
pub use supervisor::{Directive, StopReason, Supervisor};
