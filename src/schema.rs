use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("model output is not a valid json object: {0}")]
    Parse(String),
    #[error("action schema violation: {0}")]
    Schema(String),
}

/// One typed instruction emitted by the model for one execution round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Action {
    WriteFile { path: String, content: String },
    ReadFile { path: String },
    ListDir { path: String },
    SearchInFiles { path: String, query: String },
    RunCmd { cmd: String, cwd: String },
}

impl Action {
    pub fn tool_name(&self) -> &'static str {
        match self {
            Action::WriteFile { .. } => "write_file",
            Action::ReadFile { .. } => "read_file",
            Action::ListDir { .. } => "list_dir",
            Action::SearchInFiles { .. } => "search_in_files",
            Action::RunCmd { .. } => "run_cmd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    pub thought: String,
    pub actions: Vec<Action>,
}

/// Strict decode boundary for model output. The whole text must be one JSON
/// object matching the action schema; markdown fences, surrounding prose,
/// unknown tags and undeclared fields are all hard rejections. Nothing is
/// executed from a partially valid response.
pub fn parse_action_response(text: &str) -> Result<ActionResponse, ValidateError> {
    let payload = text.trim();
    let value: Value =
        serde_json::from_str(payload).map_err(|e| ValidateError::Parse(e.to_string()))?;
    let root = value
        .as_object()
        .ok_or_else(|| ValidateError::Schema("response must be a json object".to_string()))?;

    for key in root.keys() {
        if key != "thought" && key != "actions" {
            return Err(ValidateError::Schema(format!(
                "unexpected top-level field `{key}`"
            )));
        }
    }

    let thought = root
        .get("thought")
        .ok_or_else(|| ValidateError::Schema("missing required field `thought`".to_string()))?
        .as_str()
        .ok_or_else(|| ValidateError::Schema("`thought` must be a string".to_string()))?
        .to_string();

    let raw_actions = match root.get("actions") {
        None => &[] as &[Value],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => {
            return Err(ValidateError::Schema(
                "`actions` must be an array".to_string(),
            ))
        }
    };

    let mut actions = Vec::with_capacity(raw_actions.len());
    for (idx, raw) in raw_actions.iter().enumerate() {
        actions.push(validate_action(idx, raw)?);
    }

    Ok(ActionResponse { thought, actions })
}

fn validate_action(idx: usize, raw: &Value) -> Result<Action, ValidateError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidateError::Schema(format!("actions[{idx}] must be a json object")))?;
    let tool = obj
        .get("tool")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidateError::Schema(format!("actions[{idx}] is missing `tool`")))?;

    let declared: &[&str] = match tool {
        "write_file" => &["tool", "path", "content"],
        "read_file" => &["tool", "path"],
        "list_dir" => &["tool", "path"],
        "search_in_files" => &["tool", "path", "query"],
        "run_cmd" => &["tool", "cmd", "cwd"],
        other => {
            return Err(ValidateError::Schema(format!(
                "actions[{idx}] has unknown tool `{other}`"
            )))
        }
    };

    for key in obj.keys() {
        if !declared.contains(&key.as_str()) {
            return Err(ValidateError::Schema(format!(
                "actions[{idx}] ({tool}) has undeclared field `{key}`"
            )));
        }
    }

    let field = |name: &str| -> Result<String, ValidateError> {
        obj.get(name)
            .ok_or_else(|| {
                ValidateError::Schema(format!("actions[{idx}] ({tool}) is missing `{name}`"))
            })?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ValidateError::Schema(format!("actions[{idx}] ({tool}) `{name}` must be a string"))
            })
    };

    let action = match tool {
        "write_file" => Action::WriteFile {
            path: field("path")?,
            content: field("content")?,
        },
        "read_file" => Action::ReadFile {
            path: field("path")?,
        },
        "list_dir" => Action::ListDir {
            path: field("path")?,
        },
        "search_in_files" => Action::SearchInFiles {
            path: field("path")?,
            query: field("query")?,
        },
        "run_cmd" => Action::RunCmd {
            cmd: field("cmd")?,
            cwd: field("cwd")?,
        },
        _ => unreachable!("tool validated above"),
    };
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_response() {
        let parsed = parse_action_response(r#"{"thought": "nothing to do", "actions": []}"#)
            .expect("parse");
        assert_eq!(parsed.thought, "nothing to do");
        assert!(parsed.actions.is_empty());
    }

    #[test]
    fn parses_ordered_action_batch() {
        let parsed = parse_action_response(
            r#"{
                "thought": "write then run",
                "actions": [
                    {"tool": "write_file", "path": "a.txt", "content": "hi"},
                    {"tool": "run_cmd", "cmd": "python -c \"print(open('a.txt').read())\"", "cwd": "."}
                ]
            }"#,
        )
        .expect("parse");
        assert_eq!(parsed.actions.len(), 2);
        assert_eq!(parsed.actions[0].tool_name(), "write_file");
        assert_eq!(parsed.actions[1].tool_name(), "run_cmd");
    }

    #[test]
    fn missing_actions_defaults_to_empty() {
        let parsed = parse_action_response(r#"{"thought": "done"}"#).expect("parse");
        assert!(parsed.actions.is_empty());
    }

    #[test]
    fn rejects_markdown_fences_as_parse_error() {
        let err = parse_action_response("```json\n{\"thought\": \"x\", \"actions\": []}\n```")
            .expect_err("should fail");
        assert!(matches!(err, ValidateError::Parse(_)));
    }

    #[test]
    fn rejects_surrounding_prose_as_parse_error() {
        let err = parse_action_response(r#"Here you go: {"thought": "x", "actions": []}"#)
            .expect_err("should fail");
        assert!(matches!(err, ValidateError::Parse(_)));
    }

    #[test]
    fn rejects_unknown_tool_as_schema_error() {
        let err = parse_action_response(
            r#"{"thought": "x", "actions": [{"tool": "delete_everything", "path": "/"}]}"#,
        )
        .expect_err("should fail");
        assert!(matches!(err, ValidateError::Schema(_)));
    }

    #[test]
    fn rejects_undeclared_field_as_schema_error() {
        let err = parse_action_response(
            r#"{"thought": "x", "actions": [{"tool": "read_file", "path": "a", "mode": "binary"}]}"#,
        )
        .expect_err("should fail");
        match err {
            ValidateError::Schema(reason) => assert!(reason.contains("undeclared field `mode`")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = parse_action_response(r#"{"thought": "x", "actions": [{"tool": "write_file"}]}"#)
            .expect_err("should fail");
        assert!(matches!(err, ValidateError::Schema(_)));
    }

    #[test]
    fn rejects_extra_top_level_field() {
        let err = parse_action_response(r#"{"thought": "x", "actions": [], "plan": "later"}"#)
            .expect_err("should fail");
        assert!(matches!(err, ValidateError::Schema(_)));
    }

    #[test]
    fn rejects_non_string_field_types() {
        let err = parse_action_response(
            r#"{"thought": "x", "actions": [{"tool": "read_file", "path": 7}]}"#,
        )
        .expect_err("should fail");
        assert!(matches!(err, ValidateError::Schema(_)));
    }
}
