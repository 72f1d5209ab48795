//! 黑板：持久化的共享状态存储
//!
//! - **types**: Run / Subtask / Artifact / Message / Event / Lock 数据模型
//! - **path**: 产物路径规范化与逃逸校验
//! - **store**: StateStore 接口与单文件 JSON 实现

pub mod path;
pub mod store;
pub mod types;

pub use path::{normalize_relative, OutputRoot};
pub use store::{FileStateStore, StateStore, StoreOptions};
pub use types::{
    AcceptanceCheck, Artifact, Budget, Delta, Event, EventKind, Message, Metrics, NewArtifact,
    Run, Subtask, SubtaskOutput, SubtaskStatus, SubtaskTrace, SubtaskUpdate, TaskSpec,
};
