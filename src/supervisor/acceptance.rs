//! 验收谓词求值：针对外部文件系统，而不是黑板记录

use std::path::Path;

use crate::blackboard::{normalize_relative, AcceptanceCheck};

/// 全部谓词成立才算通过；空列表永不通过
pub fn acceptance_met(base_dir: &Path, checks: &[AcceptanceCheck]) -> bool {
    !checks.is_empty() && checks.iter().all(|c| holds(base_dir, c))
}

fn holds(base_dir: &Path, check: &AcceptanceCheck) -> bool {
    match check {
        AcceptanceCheck::FileExists { path } => normalize_relative(path)
            .filter(|parts| !parts.is_empty())
            .map(|parts| base_dir.join(parts.join("/")).is_file())
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exists(path: &str) -> AcceptanceCheck {
        AcceptanceCheck::FileExists { path: path.into() }
    }

    #[test]
    fn test_all_must_hold() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/mcp.md"), "x").unwrap();
        assert!(acceptance_met(dir.path(), &[exists("out/mcp.md")]));
        assert!(!acceptance_met(
            dir.path(),
            &[exists("out/mcp.md"), exists("out/review.md")]
        ));
    }

    #[test]
    fn test_empty_list_never_holds() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!acceptance_met(dir.path(), &[]));
    }

    #[test]
    fn test_directories_and_escapes_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        assert!(!acceptance_met(dir.path(), &[exists("out")]));
        assert!(!acceptance_met(dir.path(), &[exists("../etc/passwd")]));
    }
}
