use crate::model::ChatMessage;
use crate::orchestrator::OrchestratorError;
use crate::schema::Action;
use crate::shared::logging::{append_agent_log_line, JsonlLogger};
use crate::task::Task;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of executing one action. Appended to `actions.log` and never
/// mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub tool: String,
    pub input: Value,
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub truncated: bool,
}

impl ActionResult {
    pub fn success(action: &Action, output: Value, truncated: bool) -> Self {
        Self {
            tool: action.tool_name().to_string(),
            input: serde_json::to_value(action).unwrap_or(Value::Null),
            success: true,
            output,
            error: None,
            truncated,
        }
    }

    pub fn failure(action: &Action, error: String) -> Self {
        Self {
            tool: action.tool_name().to_string(),
            input: serde_json::to_value(action).unwrap_or(Value::Null),
            success: false,
            output: Value::Null,
            error: Some(error),
            truncated: false,
        }
    }

    /// Command-style failure: the command ran, the process just did not
    /// exit zero. Distinct from `failure`, which records a tool error.
    pub fn completed(action: &Action, success: bool, output: Value, truncated: bool) -> Self {
        Self {
            tool: action.tool_name().to_string(),
            input: serde_json::to_value(action).unwrap_or(Value::Null),
            success,
            output,
            error: None,
            truncated,
        }
    }
}

/// Per-run artifact directory with the fixed file contract:
/// `task.json`, `plan.md`, `state.json`, `actions.log`, `llm.log`.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    root: PathBuf,
    actions: JsonlLogger,
    llm: JsonlLogger,
}

impl RunArtifacts {
    pub fn open(root: &Path) -> Result<Self, OrchestratorError> {
        fs::create_dir_all(root).map_err(|e| io_error(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            actions: JsonlLogger::new(root.join("actions.log")),
            llm: JsonlLogger::new(root.join("llm.log")),
        })
    }

    /// Destructive reset for `run`: prior contents for the task identifier
    /// are removed before the new run starts.
    pub fn reset(root: &Path, task: &Task) -> Result<Self, OrchestratorError> {
        if root.exists() {
            fs::remove_dir_all(root).map_err(|e| io_error(root, e))?;
        }
        let artifacts = Self::open(root)?;
        artifacts.write_task(task)?;
        Ok(artifacts)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_path(&self) -> PathBuf {
        self.root.join("task.json")
    }

    pub fn plan_path(&self) -> PathBuf {
        self.root.join("plan.md")
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn write_task(&self, task: &Task) -> Result<(), OrchestratorError> {
        let path = self.task_path();
        let body = serde_json::to_vec_pretty(task).map_err(|e| json_error(&path, e))?;
        fs::write(&path, body).map_err(|e| io_error(&path, e))
    }

    pub fn write_plan(&self, plan_text: &str) -> Result<(), OrchestratorError> {
        let path = self.plan_path();
        fs::write(&path, plan_text).map_err(|e| io_error(&path, e))
    }

    pub fn log_action(&self, result: &ActionResult) -> Result<(), OrchestratorError> {
        self.actions
            .append(result)
            .map_err(|e| io_error(self.actions.path(), e))
    }

    pub fn log_request(&self, messages: &[ChatMessage]) -> Result<(), OrchestratorError> {
        self.llm
            .append(&json!({ "request": messages }))
            .map_err(|e| io_error(self.llm.path(), e))
    }

    pub fn log_response(&self, text: &str) -> Result<(), OrchestratorError> {
        self.llm
            .append(&json!({ "response": text }))
            .map_err(|e| io_error(self.llm.path(), e))
    }

    pub fn log_parse_error(&self, reason: &str) -> Result<(), OrchestratorError> {
        self.llm
            .append(&json!({ "parse_error": reason }))
            .map_err(|e| io_error(self.llm.path(), e))
    }

    pub fn log_phase_line(&self, line: &str) {
        // Diagnostic trail only; a failed append never fails the run.
        let _ = append_agent_log_line(&self.root, line);
    }
}

fn io_error(path: &Path, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> OrchestratorError {
    OrchestratorError::Json {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use tempfile::tempdir;

    fn sample_task() -> Task {
        Task {
            id: "t1".to_string(),
            title: "sample".to_string(),
            goal: "goal".to_string(),
            constraints: Map::new(),
            context: Map::new(),
        }
    }

    #[test]
    fn reset_clears_previous_run_contents() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("runs/t1");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("stale.txt"), "old").expect("write stale");

        let artifacts = RunArtifacts::reset(&root, &sample_task()).expect("reset");
        assert!(!root.join("stale.txt").exists());
        assert!(artifacts.task_path().is_file());
    }

    #[test]
    fn open_preserves_existing_contents() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("runs/t1");
        RunArtifacts::reset(&root, &sample_task()).expect("reset");
        fs::write(root.join("keep.txt"), "kept").expect("write");

        let _artifacts = RunArtifacts::open(&root).expect("open");
        assert!(root.join("keep.txt").is_file());
    }

    #[test]
    fn action_log_accumulates_records() {
        let dir = tempdir().expect("tempdir");
        let artifacts = RunArtifacts::open(dir.path()).expect("open");
        let action = Action::ReadFile {
            path: "a.txt".to_string(),
        };
        artifacts
            .log_action(&ActionResult::success(&action, json!("hi"), false))
            .expect("log ok");
        artifacts
            .log_action(&ActionResult::failure(&action, "path not found".to_string()))
            .expect("log err");

        let raw = fs::read_to_string(dir.path().join("actions.log")).expect("read");
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().nth(1).expect("line").contains("path not found"));
    }

    #[test]
    fn llm_log_keeps_request_response_order() {
        let dir = tempdir().expect("tempdir");
        let artifacts = RunArtifacts::open(dir.path()).expect("open");
        artifacts
            .log_request(&[ChatMessage::user("prompt")])
            .expect("request");
        artifacts.log_response("{}").expect("response");
        artifacts.log_parse_error("not json").expect("parse error");

        let raw = fs::read_to_string(dir.path().join("llm.log")).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert!(lines[0].contains("request"));
        assert!(lines[1].contains("response"));
        assert!(lines[2].contains("parse_error"));
    }
}
