use crate::shared::ids::validate_task_id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

pub const DEFAULT_ITERATION_LIMIT: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to read task file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse task file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid task id `{id}`: {reason}")]
    InvalidId { id: String, reason: String },
}

/// Immutable task input. Loaded once from `task.json` and never mutated for
/// the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub constraints: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Task {
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        let raw = fs::read_to_string(path).map_err(|source| TaskError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let task: Task = serde_json::from_str(&raw).map_err(|source| TaskError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        validate_task_id(&task.id).map_err(|reason| TaskError::InvalidId {
            id: task.id.clone(),
            reason,
        })?;
        Ok(task)
    }

    pub fn iteration_limit(&self) -> u32 {
        self.constraints
            .get("iteration_limit")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_ITERATION_LIMIT)
    }

    pub fn test_cmd(&self) -> Option<&str> {
        self.constraints
            .get("test_cmd")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn context_notes(&self) -> &str {
        self.context
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}
