//! 调用客户端的线协议与结果类型
//!
//! 请求：`{"id":1,"method":"call","params":{"tool":..,"args":..}}`；
//! 响应：`{"id":..,"ok":bool,"result":..,"error":..,"code":..,"retryable":bool}`。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::client::breaker::BreakerState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn call(id: u64, tool: &str, args: Value) -> Self {
        Self {
            id,
            method: "call".to_string(),
            params: json!({ "tool": tool, "args": args }),
        }
    }

    pub fn list_tools(id: u64) -> Self {
        Self {
            id,
            method: "list_tools".to_string(),
            params: Value::Null,
        }
    }

    /// call 请求里的工具名与参数
    pub fn tool_and_args(&self) -> (Option<&str>, Value) {
        let tool = self.params.get("tool").and_then(Value::as_str);
        let args = self
            .params
            .get("args")
            .cloned()
            .filter(|a| !a.is_null())
            .unwrap_or_else(|| json!({}));
        (tool, args)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            ok: true,
            result,
            error: None,
            code: None,
            retryable: false,
        }
    }

    pub fn err(id: u64, message: impl Into<String>, code: &str) -> Self {
        Self {
            id: Some(id),
            ok: false,
            result: Value::Null,
            error: Some(message.into()),
            code: Some(code.to_string()),
            retryable: false,
        }
    }
}

/// 失败分类；序列化为 `CIRCUIT_OPEN` 这类大写标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallErrorCode {
    UnknownTool,
    CircuitOpen,
    Timeout,
    Transport,
    RateLimited,
    BadResponse,
    ToolError,
}

impl CallErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            CallErrorCode::UnknownTool => "UNKNOWN_TOOL",
            CallErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            CallErrorCode::Timeout => "TIMEOUT",
            CallErrorCode::Transport => "TRANSPORT",
            CallErrorCode::RateLimited => "RATE_LIMITED",
            CallErrorCode::BadResponse => "BAD_RESPONSE",
            CallErrorCode::ToolError => "TOOL_ERROR",
        }
    }

    /// 端点返回的 code 字段映射；限流与一般失败在熔断计数上一视同仁
    pub fn from_endpoint(code: Option<&str>) -> Self {
        match code {
            Some("RATE_LIMIT") | Some("RATE_LIMITED") => CallErrorCode::RateLimited,
            Some("TIMEOUT") => CallErrorCode::Timeout,
            _ => CallErrorCode::ToolError,
        }
    }
}

impl fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 成功结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSuccess {
    pub tool: String,
    pub server_id: String,
    pub result: Value,
    pub latency_ms: u64,
    pub from_cache: bool,
    pub circuit: BreakerState,
}

/// 失败结果：作为值返回给 handler，不跨调用边界 panic
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{tool}: {code}: {message}")]
pub struct CallFailure {
    pub tool: String,
    pub server_id: Option<String>,
    pub code: CallErrorCode,
    pub message: String,
    /// 失败后该工具的熔断状态；未知工具为 None
    pub circuit: Option<BreakerState>,
    pub latency_ms: u64,
}

impl CallFailure {
    pub fn unknown_tool(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            server_id: None,
            code: CallErrorCode::UnknownTool,
            message: format!("tool not in registry: {tool}"),
            circuit: None,
            latency_ms: 0,
        }
    }
}

pub type CallResult = Result<CallSuccess, CallFailure>;

/// 单次调用选项
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// false 时跳过缓存读写（仍受熔断约束）
    pub use_cache: bool,
    /// 覆盖客户端默认超时
    pub timeout: Option<std::time::Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            timeout: None,
        }
    }
}

impl CallOptions {
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }
}
