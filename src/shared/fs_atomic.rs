use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Write-new-then-swap. The target is never left partially written, so a
/// crashed run always resumes from a consistent snapshot.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    fs::create_dir_all(parent)?;
    let tmp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("state"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    sync_parent_dir(parent)?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> std::io::Result<()> {
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("state.json");
        atomic_write_file(&target, b"first").expect("write first");
        atomic_write_file(&target, b"second").expect("write second");
        assert_eq!(fs::read_to_string(&target).expect("read"), "second");
    }

    #[test]
    fn atomic_write_creates_missing_parents() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("nested/deeper/state.json");
        atomic_write_file(&target, b"{}").expect("write");
        assert!(target.is_file());
    }

    #[test]
    fn no_temp_files_remain_after_write() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("state.json");
        atomic_write_file(&target, b"{}").expect("write");
        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }
}
