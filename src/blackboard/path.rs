//! 产物路径校验
//!
//! 产物路径必须是相对 base_dir 的路径、以输出前缀（默认 `out/`）开头，且规范化后仍落在输出根目录内。
//! 含 `..` 或绝对路径一律视为逃逸；再对已存在的最长前缀 canonicalize，防止经符号链接跳出（目标文件可以尚不存在）。

use std::path::{Component, Path, PathBuf};

use crate::core::StoreError;

/// 词法规范化一个相对路径：统一分隔符、去掉 `.`；遇到 `..` / 根 / 盘符返回 None
pub fn normalize_relative(raw: &str) -> Option<Vec<String>> {
    let unified = raw.replace('\\', "/");
    let mut parts = Vec::new();
    for comp in Path::new(&unified).components() {
        match comp {
            Component::Normal(p) => parts.push(p.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts)
}

/// 输出根目录：base_dir/<prefix>
#[derive(Debug, Clone)]
pub struct OutputRoot {
    base_dir: PathBuf,
    out_dir: PathBuf,
    prefix: String,
}

impl OutputRoot {
    pub fn new(base_dir: impl AsRef<Path>, prefix: &str) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        let prefix = prefix.trim_matches('/').to_string();
        Self {
            out_dir: base_dir.join(&prefix),
            base_dir,
            prefix,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 校验并返回规范化后的相对路径（如 `out/notes.md`）
    pub fn validate(&self, raw: &str) -> Result<String, StoreError> {
        let parts = normalize_relative(raw).ok_or_else(|| StoreError::PathEscape(raw.to_string()))?;

        let unified = raw.replace('\\', "/");
        let wanted = format!("{}/", self.prefix);
        if !unified.starts_with(&wanted) || parts.len() < 2 || parts[0] != self.prefix {
            return Err(StoreError::Shape(format!(
                "artifact path must start with '{wanted}', got '{raw}'"
            )));
        }

        let normalized = parts.join("/");
        let full = resolve_existing(&self.base_dir.join(&normalized));
        if !full.starts_with(resolve_existing(&self.out_dir)) {
            return Err(StoreError::PathEscape(raw.to_string())); // 符号链接指向 out 之外
        }
        Ok(normalized)
    }

    /// 相对路径对应的磁盘位置
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.base_dir.join(relative)
    }
}

/// 对最长的已存在前缀做 canonicalize，再拼回尚不存在的尾部
fn resolve_existing(path: &Path) -> PathBuf {
    let mut tail = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return tail.iter().rev().fold(canonical, |acc, name| acc.join(name));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, OutputRoot) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        let root = OutputRoot::new(dir.path(), "out");
        (dir, root)
    }

    #[test]
    fn test_accepts_paths_under_out() {
        let (_dir, root) = root();
        assert_eq!(root.validate("out/notes.md").unwrap(), "out/notes.md");
        assert_eq!(root.validate("out/./sub/a.md").unwrap(), "out/sub/a.md");
        assert_eq!(root.validate("out\\win\\b.md").unwrap(), "out/win/b.md");
    }

    #[test]
    fn test_parent_components_always_escape() {
        let (_dir, root) = root();
        for raw in [
            "a/../../etc/passwd",
            "out/../../etc/passwd",
            "out/a/../b.md",
            "..",
            "out\\..\\..\\secret",
        ] {
            assert!(
                matches!(root.validate(raw), Err(StoreError::PathEscape(_))),
                "{raw} should escape"
            );
        }
    }

    #[test]
    fn test_absolute_paths_escape() {
        let (_dir, root) = root();
        assert!(matches!(
            root.validate("/etc/passwd"),
            Err(StoreError::PathEscape(_))
        ));
    }

    #[test]
    fn test_missing_prefix_is_shape_error() {
        let (_dir, root) = root();
        for raw in ["notes.md", "output/notes.md", "out", "out/", ""] {
            assert!(
                matches!(root.validate(raw), Err(StoreError::Shape(_))),
                "{raw} should be a shape error"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_escapes() {
        let (dir, root) = root();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.md"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, dir.path().join("out/link")).unwrap();
        assert!(matches!(
            root.validate("out/link/secret.md"),
            Err(StoreError::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_escapes_for_new_file() {
        let (dir, root) = root();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, dir.path().join("out/link")).unwrap();
        for raw in ["out/link/new.md", "out/link/deeper/new.md"] {
            assert!(
                matches!(root.validate(raw), Err(StoreError::PathEscape(_))),
                "{raw} should escape"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_inside_root_is_allowed() {
        let (dir, root) = root();
        std::fs::create_dir_all(dir.path().join("out/real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("out/real"), dir.path().join("out/alias")).unwrap();
        assert_eq!(root.validate("out/alias/new.md").unwrap(), "out/alias/new.md");
    }

    #[test]
    fn test_new_nested_dirs_are_allowed() {
        let (_dir, root) = root();
        assert_eq!(root.validate("out/a/b/c.md").unwrap(), "out/a/b/c.md");
    }
}
