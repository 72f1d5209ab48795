//! 黑板存储的错误类型
//!
//! 结构性错误（NotFound / PathEscape / Shape / LockHeld）同步返回给调用方，且保证不写入半成品状态；
//! Corrupt 只在加载时出现，属于致命错误，调用方应直接终止本次 run。

use std::path::PathBuf;

use thiserror::Error;

/// StateStore 所有操作可能返回的错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 未知的子任务 / 依赖 id
    #[error("Not found: {0}")]
    NotFound(String),

    /// 产物路径规范化后落在输出根目录之外（含 `..`、绝对路径、符号链接逃逸）
    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// 产物路径不以输出前缀（如 `out/`）开头
    #[error("Invalid artifact path shape: {0}")]
    Shape(String),

    #[error("Lock held: {key} is owned by {owner}")]
    LockHeld { key: String, owner: String },

    /// 持久化记录无法解析，不能在未知状态上继续
    #[error("Corrupt store record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// 结构性错误：调用方可以捕获后继续运行
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_)
                | StoreError::PathEscape(_)
                | StoreError::Shape(_)
                | StoreError::LockHeld { .. }
        )
    }
}
