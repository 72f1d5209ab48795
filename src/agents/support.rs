//! 参考 handler 共用的小工具：带记账的工具调用、加锁写文件、失败收尾

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::blackboard::{StateStore, SubtaskStatus, SubtaskUpdate};
use crate::client::{CallClient, CallErrorCode, CallResult};
use crate::core::StoreError;

/// 一个子任务内的工具调用上下文
pub(crate) struct ToolSession<'a> {
    pub client: &'a CallClient,
    pub role: &'a str,
    pub subtask: &'a str,
}

impl ToolSession<'_> {
    /// 调用工具，计入 tool_calls（缓存命中与本地拒绝不计），并记一条 tool_call 消息
    pub async fn call(
        &self,
        store: &mut dyn StateStore,
        tool: &str,
        args: Value,
    ) -> Result<CallResult, StoreError> {
        let result = self.client.call(tool, args).await;
        let reached_endpoint = match &result {
            Ok(s) => !s.from_cache,
            Err(f) => !matches!(
                f.code,
                CallErrorCode::CircuitOpen | CallErrorCode::UnknownTool
            ),
        };
        if reached_endpoint {
            store.bump_tool_calls(1)?;
        }
        store.add_message(
            self.role,
            "tool_call",
            &describe_call(tool, &result),
            vec![self.subtask.to_string()],
        )?;
        Ok(result)
    }

    /// 对输出路径加锁后写文件；无论成败都释放锁
    pub async fn write_locked(
        &self,
        store: &mut dyn StateStore,
        rel: &str,
        text: &str,
    ) -> Result<CallResult, StoreError> {
        let key = format!("{}/{}", store.output_root().prefix(), rel);
        store.lock(&key, self.role)?;
        let outcome = self
            .call(store, "file_write_safe", json!({ "path": rel, "text": text }))
            .await;
        store.unlock(&key, self.role)?;
        outcome
    }

    /// 标记失败：attempts+1、finished_at，并写一条 `<kind>` 错误消息
    pub fn fail(&self, store: &mut dyn StateStore, kind: &str, reason: &str) -> anyhow::Result<()> {
        let attempts = store.subtask(self.subtask)?.attempts + 1;
        let now = store.now();
        store.update_subtask(
            self.subtask,
            SubtaskUpdate::status(SubtaskStatus::Failed)
                .with_attempts(attempts)
                .finished(now),
        )?;
        store.add_message(self.role, kind, reason, vec![self.subtask.to_string()])?;
        tracing::warn!(role = %self.role, subtask = %self.subtask, reason = %reason, "subtask failed");
        Ok(())
    }
}

fn describe_call(tool: &str, result: &CallResult) -> String {
    match result {
        Ok(s) => format!(
            "{tool} → ok=true lat={}ms cache={} circuit={}",
            s.latency_ms, s.from_cache, s.circuit
        ),
        Err(f) => format!(
            "{tool} → ok=false lat={}ms cache=false circuit={} code={}",
            f.latency_ms,
            f.circuit.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            f.code
        ),
    }
}

/// 去掉输出前缀，得到沙箱内相对路径（`out/notes.md` → `notes.md`）
pub(crate) fn sandbox_relative<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix(prefix)
        .and_then(|p| p.strip_prefix('/'))
        .unwrap_or(path)
}

static URL_RE: OnceLock<Regex> = OnceLock::new();

/// 文本中的 http(s) 链接，去掉尾随标点，保序去重
pub(crate) fn extract_urls(text: &str, limit: usize) -> Vec<String> {
    let re = URL_RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap());
    let mut urls: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        if urls.len() >= limit {
            break;
        }
        let url = m.as_str().trim_end_matches(['.', ',', ')', ';', ']']).to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// 文本中 http(s) 链接出现的次数（不去重）
pub(crate) fn count_urls(text: &str) -> usize {
    URL_RE
        .get_or_init(|| Regex::new(r"https?://\S+").unwrap())
        .find_iter(text)
        .count()
}
