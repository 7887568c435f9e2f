use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSON-lines log. One serialized record per line; records are
/// never rewritten after append.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    path: PathBuf,
}

impl JsonlLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, record: &T) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::other(format!("jsonl encode failed: {e}")))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

pub fn agent_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/agent.log")
}

pub fn append_agent_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = agent_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn jsonl_logger_appends_one_record_per_line() {
        let dir = tempdir().expect("tempdir");
        let logger = JsonlLogger::new(dir.path().join("actions.log"));
        logger.append(&json!({"tool": "read_file"})).expect("first");
        logger.append(&json!({"tool": "run_cmd"})).expect("second");

        let raw = fs::read_to_string(logger.path()).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("read_file"));
        assert!(lines[1].contains("run_cmd"));
    }

    #[test]
    fn agent_log_lines_accumulate() {
        let dir = tempdir().expect("tempdir");
        append_agent_log_line(dir.path(), "ts=1 task=t1 phase=plan").expect("first");
        append_agent_log_line(dir.path(), "ts=2 task=t1 phase=implement").expect("second");
        let raw = fs::read_to_string(agent_log_path(dir.path())).expect("read");
        assert_eq!(raw.lines().count(), 2);
    }
}
