//! 工作区沙箱
//!
//! Workspace 绑定一个已规范化的根目录；所有动作路径都经 resolve 解析：先做词法归一
//! （`..` 越过根即拒绝），再对最深的已存在祖先做 canonicalize，防止符号链接逃逸。
//! 目标文件可以不存在（write 会创建）。

use std::path::{Component, Path, PathBuf};

use crate::core::ActionError;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// 打开（必要时创建）工作区根目录
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ActionError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| ActionError::Io(format!("create workspace {}: {}", root.display(), e)))?;
        let root = root
            .canonicalize()
            .map_err(|e| ActionError::Io(format!("canonicalize {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析动作给出的路径；任何落在根之外的路径都是 PermissionDenied
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ActionError> {
        let raw = Path::new(path.trim());
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };

        let normalized =
            normalize(&joined).ok_or_else(|| ActionError::PermissionDenied(path.to_string()))?;
        if !normalized.starts_with(&self.root) {
            return Err(ActionError::PermissionDenied(path.to_string()));
        }

        // 符号链接：最深的已存在祖先规范化后仍须在根下
        let mut probe = Some(normalized.as_path());
        while let Some(p) = probe {
            if p.symlink_metadata().is_ok() {
                let real = p
                    .canonicalize()
                    .map_err(|_| ActionError::PermissionDenied(path.to_string()))?;
                if !real.starts_with(&self.root) {
                    return Err(ActionError::PermissionDenied(path.to_string()));
                }
                break;
            }
            probe = p.parent();
        }

        Ok(normalized)
    }

    /// 相对根目录的展示路径
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().to_string(),
        }
    }
}

/// 词法归一：去掉 `.`，`..` 弹出上一级；越过文件系统根返回 None
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();

        let p = ws.resolve("src/new/file.rs").unwrap();
        assert_eq!(p, ws.root().join("src/new/file.rs"));
        assert_eq!(ws.display(&p), "src/new/file.rs");

        let p = ws.resolve("./a/../b.txt").unwrap();
        assert_eq!(p, ws.root().join("b.txt"));

        let abs = ws.root().join("c.txt");
        assert_eq!(ws.resolve(abs.to_str().unwrap()).unwrap(), abs);
        assert_eq!(ws.display(ws.root()), ".");
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path().join("root")).unwrap();

        for bad in ["../outside.txt", "a/../../x", "/etc/passwd"] {
            assert!(
                matches!(ws.resolve(bad), Err(ActionError::PermissionDenied(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let ws = Workspace::open(dir.path().join("root")).unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        assert!(matches!(
            ws.resolve("link/secret.txt"),
            Err(ActionError::PermissionDenied(_))
        ));
    }
}
