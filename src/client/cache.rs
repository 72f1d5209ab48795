//! 只读工具的响应缓存
//!
//! 键为 `{tool, args}` 规范化 JSON 的 SHA-256；只有白名单内的工具可缓存，条目超过 TTL 即失效。

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// 只读、无副作用的工具名
    pub tools: HashSet<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(60),
            tools: ["web_search", "search_local_docs"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CacheConfig {
    pub fn is_eligible(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub stored_at: DateTime<Utc>,
    pub result: Value,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.stored_at <= ttl
    }
}

/// 确定性缓存键：对象键排序后序列化再取 SHA-256
pub fn cache_key(tool: &str, args: &Value) -> String {
    let blob = canonicalize(&json!({ "tool": tool, "args": args })).to_string();
    hex::encode(Sha256::digest(blob.as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
