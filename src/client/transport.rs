//! 传输层：一次请求 / 一次响应
//!
//! - InProcessTransport：直接派发到进程内 ToolRegistry
//! - StdioTransport：每个请求启动一次端点进程，写入一行 JSON，读取 stdout 最后一个非空行；超时即杀进程
//! - HttpTransport：POST JSON 请求体到 URL

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::client::types::{RpcRequest, RpcResponse};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("endpoint closed without a response")]
    Closed,

    #[error("http error: {0}")]
    Http(String),

    #[error("malformed response: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponse, TransportError>;
}

/// 进程内端点
pub struct InProcessTransport {
    tools: Arc<ToolRegistry>,
}

impl InProcessTransport {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    async fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            "list_tools" => RpcResponse::ok(request.id, json!({ "tools": self.tools.describe() })),
            "call" => {
                let (tool, args) = request.tool_and_args();
                let Some(tool) = tool else {
                    return RpcResponse::err(request.id, "missing tool", "ERR");
                };
                match self.tools.execute(tool, args).await {
                    Ok(result) => RpcResponse::ok(request.id, result),
                    Err(e) => RpcResponse::err(request.id, e.to_string(), e.code()),
                }
            }
            other => RpcResponse::err(request.id, format!("unknown method: {other}"), "ERR"),
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn request(
        &self,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponse, TransportError> {
        tokio::time::timeout(timeout, self.dispatch(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))
    }
}

/// 子进程端点：stdin 一行请求，stdout 最后一行响应
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd,
        }
    }

    async fn exchange(&self, line: String) -> Result<RpcResponse, TransportError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let last = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or(TransportError::Closed)?;
        serde_json::from_str(last).map_err(|e| TransportError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponse, TransportError> {
        let line = serde_json::to_string(request)
            .map_err(|e| TransportError::BadResponse(e.to_string()))?;
        // 超时后 future 被丢弃，kill_on_drop 负责结束子进程
        tokio::time::timeout(timeout, self.exchange(line))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}

/// HTTP 端点
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponse, TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("status {status}")));
        }
        resp.json::<RpcResponse>()
            .await
            .map_err(|e| TransportError::BadResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolError};
    use serde_json::Value;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn transport() -> InProcessTransport {
        let mut reg = ToolRegistry::new();
        reg.register(Sleepy);
        reg.register(crate::tools::WebSearchTool::new(
            10,
            Arc::new(crate::core::SystemClock),
        ));
        InProcessTransport::new(Arc::new(reg))
    }

    #[tokio::test]
    async fn test_in_process_call_and_list() {
        let t = transport();
        let resp = t
            .request(
                &RpcRequest::call(7, "web_search", json!({"query": "mcp", "top_k": 1})),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.id, Some(7));
        assert_eq!(resp.result["hits"].as_array().unwrap().len(), 1);

        let list = t
            .request(&RpcRequest::list_tools(8), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(list.result["tools"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_process_unknown_tool_is_error_response() {
        let resp = transport()
            .request(&RpcRequest::call(1, "nope", json!({})), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.code.as_deref(), Some("ERR"));
    }

    #[tokio::test]
    async fn test_in_process_timeout() {
        let err = transport()
            .request(&RpcRequest::call(1, "sleepy", json!({})), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_reads_last_line() {
        let script = r#"read line; echo "noise"; echo '{"id":1,"ok":true,"result":{"pong":true}}'; echo"#;
        let t = StdioTransport::new("sh", vec!["-c".into(), script.into()], None);
        let resp = t
            .request(&RpcRequest::list_tools(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.result, json!({"pong": true}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_empty_output_is_closed() {
        let t = StdioTransport::new("sh", vec!["-c".into(), "read line".into()], None);
        let err = t
            .request(&RpcRequest::list_tools(1), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
