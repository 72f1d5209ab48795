//! 沙箱文件系统工具
//!
//! SafeFs 绑定输出根目录，所有路径先做词法校验（禁止 `..` 与绝对路径），再 canonicalize 确认仍在根下；
//! FileWriteTool / FileReadTool 基于 SafeFs 提供 `file_write_safe` / `file_read_safe`。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::blackboard::normalize_relative;
use crate::core::Clock;
use crate::tools::rate_limit::RateLimiter;
use crate::tools::{Tool, ToolError};

/// 单次写入上限
pub const MAX_BYTES: usize = 256 * 1024;

/// 沙箱文件系统：路径相对 root_dir，结果路径带上对外前缀（如 `out/notes.md`）
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
    prefix: String,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>, prefix: &str) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// 词法校验，返回 (磁盘路径, 规范化相对路径)
    fn lexical(&self, path: &str) -> Result<(PathBuf, String), ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::InvalidArgs("invalid path".into()));
        }
        let parts = normalize_relative(path).ok_or_else(|| ToolError::PathEscape(path.to_string()))?;
        if parts.is_empty() {
            return Err(ToolError::InvalidArgs("invalid path".into()));
        }
        let rel = parts.join("/");
        Ok((self.root_dir.join(&rel), rel))
    }

    fn ensure_inside(&self, original: &str, existing: &Path) -> Result<(), ToolError> {
        let root = self
            .root_dir
            .canonicalize()
            .unwrap_or_else(|_| self.root_dir.clone());
        match existing.canonicalize() {
            Ok(canonical) if canonical.starts_with(&root) => Ok(()),
            Ok(_) => Err(ToolError::PathEscape(original.to_string())), // 经符号链接跳出
            Err(e) => Err(ToolError::Failed(e.to_string())),
        }
    }

    pub fn write_file(&self, path: &str, text: &str) -> Result<String, ToolError> {
        if text.len() > MAX_BYTES {
            return Err(ToolError::TooLarge {
                size: text.len(),
                limit: MAX_BYTES,
            });
        }
        let (target, rel) = self.lexical(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| ToolError::InvalidArgs("invalid path".into()))?;
        std::fs::create_dir_all(parent).map_err(|e| ToolError::Failed(format!("Write failed: {e}")))?;
        self.ensure_inside(path, parent)?;
        if target.exists() {
            self.ensure_inside(path, &target)?;
        }
        std::fs::write(&target, text).map_err(|e| ToolError::Failed(format!("Write failed: {e}")))?;
        Ok(format!("{}/{}", self.prefix, rel))
    }

    pub fn read_file(&self, path: &str) -> Result<String, ToolError> {
        let (target, _) = self.lexical(path)?;
        if !target.is_file() {
            return Err(ToolError::NotFound(path.to_string()));
        }
        self.ensure_inside(path, &target)?;
        let bytes = std::fs::read(&target).map_err(|e| ToolError::Failed(format!("Read failed: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("{key} must be string")))
}

/// `file_write_safe`：写文本到沙箱，返回 `{"path": "out/<rel>"}`
pub struct FileWriteTool {
    fs: SafeFs,
    limiter: RateLimiter,
}

impl FileWriteTool {
    pub fn new(fs: SafeFs, per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            fs,
            limiter: RateLimiter::new("file_write_safe", per_minute, clock),
        }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write_safe"
    }

    fn description(&self) -> &str {
        "Write UTF-8 text under the output root. Args: {\"path\": \"relative path\", \"text\": \"content\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "text": {"type": "string"}
            },
            "required": ["path", "text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.limiter.acquire()?;
        let path = str_arg(&args, "path")?;
        let text = str_arg(&args, "text")?;
        tracing::info!(path = %path, bytes = text.len(), "file_write_safe execute");
        let written = self.fs.write_file(path, text)?;
        Ok(json!({ "path": written }))
    }
}

/// `file_read_safe`：读取沙箱内文件，返回 `{"text": ..}`
pub struct FileReadTool {
    fs: SafeFs,
    limiter: RateLimiter,
}

impl FileReadTool {
    pub fn new(fs: SafeFs, per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            fs,
            limiter: RateLimiter::new("file_read_safe", per_minute, clock),
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read_safe"
    }

    fn description(&self) -> &str {
        "Read a file under the output root. Args: {\"path\": \"relative path\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.limiter.acquire()?;
        let path = str_arg(&args, "path")?;
        tracing::info!(path = %path, "file_read_safe execute");
        let text = self.fs.read_file(path)?;
        Ok(json!({ "text": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SystemClock;
    use tempfile::TempDir;

    fn tools(dir: &TempDir) -> (FileWriteTool, FileReadTool) {
        let fs = SafeFs::new(dir.path(), "out");
        (
            FileWriteTool::new(fs.clone(), 60, Arc::new(SystemClock)),
            FileReadTool::new(fs, 120, Arc::new(SystemClock)),
        )
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let (w, r) = tools(&dir);
        let out = w
            .execute(json!({"path": "sub/notes.md", "text": "- a\n"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"path": "out/sub/notes.md"}));
        assert!(dir.path().join("sub/notes.md").exists());
        let read = r.execute(json!({"path": "sub/notes.md"})).await.unwrap();
        assert_eq!(read["text"], "- a\n");
    }

    #[tokio::test]
    async fn test_traversal_and_absolute_rejected() {
        let dir = TempDir::new().unwrap();
        let (w, r) = tools(&dir);
        let err = w
            .execute(json!({"path": "../escape.md", "text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
        let err = r.execute(json!({"path": "/etc/passwd"})).await.unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
    }

    #[tokio::test]
    async fn test_payload_cap_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let (w, r) = tools(&dir);
        let big = "x".repeat(MAX_BYTES + 1);
        let err = w
            .execute(json!({"path": "big.txt", "text": big}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::TooLarge { .. }));
        let err = r.execute(json!({"path": "nope.md"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_write_rate_limited() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path(), "out");
        let w = FileWriteTool::new(fs, 1, Arc::new(crate::core::ManualClock::default()));
        w.execute(json!({"path": "a.md", "text": "1"})).await.unwrap();
        let err = w
            .execute(json!({"path": "b.md", "text": "2"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMIT");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let fs = SafeFs::new(dir.path(), "out");
        let err = fs.write_file("link/x.md", "x").unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
    }
}
