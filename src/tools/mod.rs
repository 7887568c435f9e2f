use std::fs;
use std::path::{Component, Path, PathBuf};

pub mod cmd;
pub mod fs_tool;

pub use cmd::{run_cmd, CmdOutput, CmdPolicy};
pub use fs_tool::{list_dir, read_file, search_in_files, write_file, SearchMatch};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("path escapes workspace: {path}")]
    SandboxViolation { path: String },
    #[error("command is empty")]
    EmptyCommand,
    #[error("command could not be tokenized: {reason}")]
    CommandParse { reason: String },
    #[error("command not allowed: {exe}")]
    CommandNotAllowed { exe: String },
    #[error("command contains blocked token `{token}`")]
    BlockedToken { token: String },
    #[error("command timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("path not found: {path}")]
    NotFound { path: String },
    #[error("file {path} is {size} bytes, over the {limit} byte read limit")]
    FileTooLarge {
        path: String,
        size: u64,
        limit: u64,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Sandbox and policy rejections abort the rest of an action batch;
    /// everything else is an ordinary per-action failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ToolError::SandboxViolation { .. } | ToolError::BlockedToken { .. }
        )
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> ToolError {
    ToolError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Sandboxed root directory scoped to one task/run. Every path-bearing tool
/// operation resolves through [`Workspace::resolve`] and is rejected when the
/// resolved path is not a descendant of the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: &Path) -> Result<Self, ToolError> {
        fs::create_dir_all(root).map_err(|e| io_error(root, e))?;
        let root = fs::canonicalize(root).map_err(|e| io_error(root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path against the root. Defends against `..`
    /// traversal, absolute paths outside the root, and symlink escape by
    /// resolving through the deepest existing ancestor.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let violation = || ToolError::SandboxViolation {
            path: raw.to_string(),
        };
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = lexical_normalize(&joined).ok_or_else(violation)?;
        let resolved = canonicalize_allowing_missing(&normalized)
            .map_err(|e| io_error(&normalized, e))?;
        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(violation())
        }
    }
}

fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => normalized.push(component.as_os_str()),
            Component::Normal(v) => normalized.push(v),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
        }
    }
    Some(normalized)
}

fn canonicalize_allowing_missing(path: &Path) -> std::io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let parent = match path.parent() {
                Some(parent) if parent != path => parent,
                _ => return Err(err),
            };
            let name = path
                .file_name()
                .ok_or_else(|| std::io::Error::other("path has no file name"))?;
            Ok(canonicalize_allowing_missing(parent)?.join(name))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_accepts_relative_descendants() {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        let resolved = workspace.resolve("src/main.rs").expect("resolve");
        assert!(resolved.starts_with(workspace.root()));
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        let err = workspace.resolve("../outside.txt").expect_err("should fail");
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
    }

    #[test]
    fn resolve_rejects_absolute_paths_outside_root() {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        let err = workspace.resolve("/etc/passwd").expect_err("should fail");
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
    }

    #[test]
    fn resolve_rejects_nested_traversal_that_escapes() {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        let err = workspace
            .resolve("a/b/../../../outside.txt")
            .expect_err("should fail");
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
    }

    #[test]
    fn resolve_allows_dot_segments_that_stay_inside() {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        let resolved = workspace.resolve("./a/../b.txt").expect("resolve");
        assert_eq!(resolved, workspace.root().join("b.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        let outer = tempdir().expect("outer");
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        std::os::unix::fs::symlink(outer.path(), workspace.root().join("link"))
            .expect("symlink");
        let err = workspace.resolve("link/secret.txt").expect_err("should fail");
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
    }

    #[test]
    fn fatal_classification_covers_sandbox_and_blocked() {
        assert!(ToolError::SandboxViolation {
            path: "x".to_string()
        }
        .is_fatal());
        assert!(ToolError::BlockedToken {
            token: "sudo".to_string()
        }
        .is_fatal());
        assert!(!ToolError::Timeout { seconds: 30 }.is_fatal());
        assert!(!ToolError::NotFound {
            path: "x".to_string()
        }
        .is_fatal());
    }
}
