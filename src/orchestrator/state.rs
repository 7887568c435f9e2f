use crate::orchestrator::OrchestratorError;
use crate::shared::fs_atomic::atomic_write_file;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ingest,
    Plan,
    Implement,
    Verify,
    Repair,
    Done,
    IterationLimitExceeded,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::IterationLimitExceeded)
    }

    /// Phases that issue a model call and therefore consume one iteration
    /// of the task budget. INGEST and VERIFY never call the model.
    pub fn consumes_iteration(self) -> bool {
        matches!(self, Phase::Plan | Phase::Implement | Phase::Repair)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Ingest => "ingest",
            Phase::Plan => "plan",
            Phase::Implement => "implement",
            Phase::Verify => "verify",
            Phase::Repair => "repair",
            Phase::Done => "done",
            Phase::IterationLimitExceeded => "iteration_limit_exceeded",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Success,
    IterationLimit,
    Error,
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Terminal::Success => "success",
            Terminal::IterationLimit => "iteration_limit",
            Terminal::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Mutable, persisted run snapshot. Owned exclusively by the orchestrator
/// and written after every phase transition so a crashed run resumes from
/// the last committed phase. The iteration counter never decreases; once
/// `terminal` is set the machine stops advancing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub task_id: String,
    pub phase: Phase,
    pub iteration: u32,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub last_feedback: String,
    #[serde(default)]
    pub last_response: Option<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub terminal: Option<Terminal>,
}

impl RunState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase: Phase::Ingest,
            iteration: 0,
            last_result: None,
            last_feedback: String::new(),
            last_response: None,
            files_touched: Vec::new(),
            terminal: None,
        }
    }

    pub fn record_touched(&mut self, paths: &[String]) {
        for path in paths {
            if !self.files_touched.iter().any(|existing| existing == path) {
                self.files_touched.push(path.clone());
            }
        }
    }
}

/// Durable store for `state.json`. Saves go through write-new-then-swap so
/// `resume` always loads a complete snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<RunState, OrchestratorError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| io_error(&self.path, e))?;
        serde_json::from_str(&raw).map_err(|e| json_error(&self.path, e))
    }

    pub fn save(&self, state: &RunState) -> Result<(), OrchestratorError> {
        let body = serde_json::to_vec_pretty(state).map_err(|e| json_error(&self.path, e))?;
        atomic_write_file(&self.path, &body).map_err(|e| io_error(&self.path, e))
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
    use tempfile::tempdir;

    #[test]
    fn phase_classification() {
        assert!(Phase::Done.is_terminal());
        assert!(Phase::IterationLimitExceeded.is_terminal());
        assert!(!Phase::Verify.is_terminal());
        assert!(Phase::Plan.consumes_iteration());
        assert!(Phase::Repair.consumes_iteration());
        assert!(!Phase::Ingest.consumes_iteration());
        assert!(!Phase::Verify.consumes_iteration());
    }

    #[test]
    fn state_round_trips_through_store() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        let mut state = RunState::new("t1");
        state.phase = Phase::Verify;
        state.iteration = 4;
        state.record_touched(&["a.txt".to_string(), "a.txt".to_string()]);
        store.save(&state).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, state);
        assert_eq!(loaded.files_touched, vec!["a.txt".to_string()]);
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::IterationLimitExceeded).expect("encode");
        assert_eq!(json, "\"iteration_limit_exceeded\"");
        let json = serde_json::to_string(&Terminal::IterationLimit).expect("encode");
        assert_eq!(json, "\"iteration_limit\"");
    }

    #[test]
    fn loading_missing_state_is_an_io_error() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(!store.exists());
        let err = store.load().expect_err("should fail");
        assert!(matches!(err, OrchestratorError::Io { .. }));
    }
}
