//! 检索工具：本地文档搜索与离线 web_search
//!
//! - `search_local_docs`：在配置的文档目录下遍历 `*.md`，大小写不敏感子串匹配，
//!   每个命中文件取前 3 行匹配行用 ` | ` 拼成 snippet。
//! - `web_search`：内置固定结果表，供离线运行；未知查询回落到 `mcp` 的结果。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::Clock;
use crate::tools::rate_limit::RateLimiter;
use crate::tools::{Tool, ToolError};

fn query_args(args: &Value, default_k: u64) -> (String, usize) {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let top_k = args.get("top_k").and_then(Value::as_u64).unwrap_or(default_k) as usize;
    (query, top_k)
}

/// 本地文档搜索
pub struct LocalDocsTool {
    /// 相对路径以此为基准输出
    root: PathBuf,
    search_dirs: Vec<PathBuf>,
    limiter: RateLimiter,
}

impl LocalDocsTool {
    pub fn new(
        root: impl AsRef<Path>,
        search_dirs: Vec<PathBuf>,
        per_minute: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            search_dirs,
            limiter: RateLimiter::new("search_local_docs", per_minute, clock),
        }
    }

    fn collect_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in &self.search_dirs {
            let base = if dir.is_absolute() {
                dir.clone()
            } else {
                self.root.join(dir)
            };
            if !base.exists() {
                continue;
            }
            let mut found: Vec<PathBuf> = WalkDir::new(&base)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("md"))
                .collect();
            found.sort();
            files.extend(found);
        }
        files
    }
}

#[async_trait]
impl Tool for LocalDocsTool {
    fn name(&self) -> &str {
        "search_local_docs"
    }

    fn description(&self) -> &str {
        "Search local markdown docs. Args: {\"query\": \"text\", \"top_k\": 5}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "top_k": {"type": "integer", "default": 5}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.limiter.acquire()?;
        let (query, top_k) = query_args(&args, 5);
        if query.is_empty() {
            return Ok(json!({ "hits": [] }));
        }
        let rx = RegexBuilder::new(&regex::escape(&query))
            .case_insensitive(true)
            .build()
            .map_err(|e| ToolError::InvalidArgs(e.to_string()))?;

        let mut hits = Vec::new();
        for file in self.collect_files() {
            if hits.len() >= top_k {
                break;
            }
            let Ok(bytes) = std::fs::read(&file) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = text.lines().filter(|l| rx.is_match(l)).take(3).collect();
            if lines.is_empty() {
                continue;
            }
            let rel = file
                .strip_prefix(&self.root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            hits.push(json!({ "path": rel, "snippet": lines.join(" | ") }));
        }
        tracing::info!(query = %query, hits = hits.len(), "search_local_docs execute");
        Ok(json!({ "hits": hits }))
    }
}

/// 离线 web_search：固定结果表
pub struct WebSearchTool {
    limiter: RateLimiter,
}

impl WebSearchTool {
    pub fn new(per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: RateLimiter::new("web_search", per_minute, clock),
        }
    }

    fn stub_hits(_query: &str) -> Vec<Value> {
        // 目前只有一组结果，其余查询都回落到这里
        vec![
            json!({
                "title": "Model Context Protocol (spec)",
                "url": "https://github.com/modelcontextprotocol/spec",
                "snippet": "MCP standardizes how AI agents and tools communicate."
            }),
            json!({
                "title": "Intro to MCP",
                "url": "https://openai.com/index/model-context-protocol/",
                "snippet": "Overview and motivation for MCP as a tool interface."
            }),
            json!({
                "title": "Why MCP matters",
                "url": "https://example.com/mcp-overview",
                "snippet": "Portability, safety, orchestration benefits."
            }),
        ]
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Web search (offline results). Args: {\"query\": \"text\", \"top_k\": 3}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "top_k": {"type": "integer", "default": 3}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.limiter.acquire()?;
        let (query, top_k) = query_args(&args, 3);
        if query.is_empty() {
            return Ok(json!({ "hits": [] }));
        }
        let hits: Vec<Value> = Self::stub_hits(&query.to_lowercase())
            .into_iter()
            .take(top_k)
            .collect();
        Ok(json!({ "hits": hits }))
    }
}
