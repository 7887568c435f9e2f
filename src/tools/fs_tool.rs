use super::{io_error, ToolError, Workspace};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Reads over this size fail with an explicit error instead of being
/// silently truncated.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

pub fn read_file(workspace: &Workspace, path: &str) -> Result<String, ToolError> {
    let resolved = workspace.resolve(path)?;
    let metadata = fs::metadata(&resolved).map_err(|e| not_found_or_io(&resolved, e))?;
    if metadata.len() > MAX_READ_BYTES {
        return Err(ToolError::FileTooLarge {
            path: resolved.display().to_string(),
            size: metadata.len(),
            limit: MAX_READ_BYTES,
        });
    }
    let bytes = fs::read(&resolved).map_err(|e| not_found_or_io(&resolved, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn write_file(workspace: &Workspace, path: &str, content: &str) -> Result<String, ToolError> {
    let resolved = workspace.resolve(path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    fs::write(&resolved, content).map_err(|e| io_error(&resolved, e))?;
    Ok(format!("wrote {}", resolved.display()))
}

pub fn list_dir(workspace: &Workspace, path: &str) -> Result<Vec<String>, ToolError> {
    let resolved = workspace.resolve(path)?;
    if !resolved.exists() {
        return Err(ToolError::NotFound {
            path: resolved.display().to_string(),
        });
    }
    let mut entries = Vec::new();
    for entry in fs::read_dir(&resolved).map_err(|e| io_error(&resolved, e))? {
        let entry = entry.map_err(|e| io_error(&resolved, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push(if is_dir { format!("{name}/") } else { name });
    }
    entries.sort();
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// Plain substring line scan over every file under `path`, recursive.
pub fn search_in_files(
    workspace: &Workspace,
    path: &str,
    query: &str,
) -> Result<Vec<SearchMatch>, ToolError> {
    let base = workspace.resolve(path)?;
    if !base.exists() {
        return Err(ToolError::NotFound {
            path: base.display().to_string(),
        });
    }
    let mut matches = Vec::new();
    scan(workspace.root(), &base, query, &mut matches)?;
    Ok(matches)
}

fn scan(
    root: &Path,
    target: &Path,
    query: &str,
    matches: &mut Vec<SearchMatch>,
) -> Result<(), ToolError> {
    if target.is_dir() {
        let mut children: Vec<_> = fs::read_dir(target)
            .map_err(|e| io_error(target, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        children.sort();
        for child in children {
            scan(root, &child, query, matches)?;
        }
        return Ok(());
    }
    if !target.is_file() {
        return Ok(());
    }
    // Binary or unreadable files are skipped, not fatal to the scan.
    let Ok(bytes) = fs::read(target) else {
        return Ok(());
    };
    let text = String::from_utf8_lossy(&bytes);
    for (idx, line) in text.lines().enumerate() {
        if line.contains(query) {
            matches.push(SearchMatch {
                path: target
                    .strip_prefix(root)
                    .unwrap_or(target)
                    .display()
                    .to_string(),
                line: idx + 1,
                text: line.trim().to_string(),
            });
        }
    }
    Ok(())
}

fn not_found_or_io(path: &Path, source: std::io::Error) -> ToolError {
    if source.kind() == std::io::ErrorKind::NotFound {
        ToolError::NotFound {
            path: path.display().to_string(),
        }
    } else {
        io_error(path, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        (dir, workspace)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, ws) = workspace();
        write_file(&ws, "nested/notes.txt", "hello").expect("write");
        assert_eq!(read_file(&ws, "nested/notes.txt").expect("read"), "hello");
    }

    #[test]
    fn write_overwrites_existing_content() {
        let (_dir, ws) = workspace();
        write_file(&ws, "a.txt", "first").expect("write");
        write_file(&ws, "a.txt", "second").expect("overwrite");
        assert_eq!(read_file(&ws, "a.txt").expect("read"), "second");
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let (_dir, ws) = workspace();
        let err = read_file(&ws, "absent.txt").expect_err("should fail");
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[test]
    fn oversized_read_is_an_explicit_error() {
        let (_dir, ws) = workspace();
        let big = "x".repeat((MAX_READ_BYTES + 1) as usize);
        write_file(&ws, "big.txt", &big).expect("write");
        let err = read_file(&ws, "big.txt").expect_err("should fail");
        assert!(matches!(err, ToolError::FileTooLarge { .. }));
    }

    #[test]
    fn write_outside_root_performs_no_io() {
        let (dir, ws) = workspace();
        let err = write_file(&ws, "../leak.txt", "data").expect_err("should fail");
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
        assert!(!dir.path().parent().expect("parent").join("leak.txt").exists());
    }

    #[test]
    fn list_dir_sorts_and_marks_directories() {
        let (_dir, ws) = workspace();
        write_file(&ws, "b.txt", "").expect("write");
        write_file(&ws, "adir/inner.txt", "").expect("write");
        let entries = list_dir(&ws, ".").expect("list");
        assert_eq!(entries, vec!["adir/".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn search_reports_relative_path_line_and_text() {
        let (_dir, ws) = workspace();
        write_file(&ws, "src/lib.rs", "fn main() {}\nlet needle = 1;\n").expect("write");
        write_file(&ws, "src/other.rs", "nothing here\n").expect("write");
        let matches = search_in_files(&ws, ".", "needle").expect("search");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/lib.rs");
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].text, "let needle = 1;");
    }

    #[test]
    fn search_missing_base_is_not_found() {
        let (_dir, ws) = workspace();
        let err = search_in_files(&ws, "missing", "x").expect_err("should fail");
        assert!(matches!(err, ToolError::NotFound { .. }));
    }
}
