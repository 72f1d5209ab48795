//! 进程内工具：沙箱文件读写、本地文档搜索、离线 web_search，各自带每分钟限流

pub mod filesystem;
pub mod rate_limit;
pub mod registry;
pub mod search;

use std::path::Path;
use std::sync::Arc;

use crate::config::ToolsSection;
use crate::core::Clock;

pub use filesystem::{FileReadTool, FileWriteTool, SafeFs, MAX_BYTES};
pub use rate_limit::RateLimiter;
pub use registry::{Tool, ToolError, ToolRegistry};
pub use search::{LocalDocsTool, WebSearchTool};

/// 内置进程内工具集：沙箱读写 + 本地文档搜索 + 离线 web_search
pub fn builtin_registry(
    cfg: &ToolsSection,
    base_dir: &Path,
    out_prefix: &str,
    clock: Arc<dyn Clock>,
) -> ToolRegistry {
    let fs = SafeFs::new(base_dir.join(out_prefix), out_prefix);
    let limits = &cfg.rate_limits;
    let mut registry = ToolRegistry::new();
    registry.register(FileWriteTool::new(fs.clone(), limits.file_write_safe, clock.clone()));
    registry.register(FileReadTool::new(fs, limits.file_read_safe, clock.clone()));
    registry.register(LocalDocsTool::new(
        base_dir,
        cfg.docs_dirs.clone(),
        limits.search_local_docs,
        clock.clone(),
    ));
    registry.register(WebSearchTool::new(limits.web_search, clock));
    registry
}
