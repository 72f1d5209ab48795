//! 工具注册表
//!
//! 所有进程内工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! InProcessTransport 把 `call` / `list_tools` 请求派发到这里。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 工具执行错误；code() 即响应里的 `code` 字段
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid args: {0}")]
    InvalidArgs(String),

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("path escapes sandbox: {0}")]
    PathEscape(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("payload too large: {size} > {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::RateLimited(_) => "RATE_LIMIT",
            _ => "ERR",
        }
    }
}

/// 工具 trait：名称、描述、参数 schema、异步执行（args 与结果均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 按名称存储 Arc<dyn Tool>，名称有序便于 list_tools 输出稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// list_tools 的结果体：`[{name, description, parameters}]`
    pub fn describe(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        Value::Array(tools)
    }
}
