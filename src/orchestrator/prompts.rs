use crate::task::Task;
use std::path::Path;

pub const SYSTEM_PROMPT: &str = r#"You are Wisp, a coding agent.
You MUST respond with ONLY valid JSON matching this schema:
{
  "thought": "string",
  "actions": [
    { "tool": "write_file", "path": "...", "content": "..." },
    { "tool": "read_file", "path": "..." },
    { "tool": "list_dir", "path": "..." },
    { "tool": "search_in_files", "path": "...", "query": "..." },
    { "tool": "run_cmd", "cmd": "...", "cwd": "..." }
  ]
}
No prose, no markdown, no extra keys. Do not use code fences.
If no actions are needed, return {"thought": "...", "actions": []}.
Do not use placeholder values like "...". Provide real paths, commands, and queries.
Respect tool rules: stay inside the workspace root and use only allowed commands.
"#;

pub fn initial_context(task: &Task, workspace_root: &Path) -> String {
    format!(
        "Workspace root: {}\nTask id: {}\nTitle: {}\nGoal: {}\nConstraints: {}\nContext: {}\nTool rules: paths and cwd must stay inside the workspace.\n",
        workspace_root.display(),
        task.id,
        task.title,
        task.goal,
        serde_json::to_string(&task.constraints).unwrap_or_else(|_| "{}".to_string()),
        serde_json::to_string(&task.context).unwrap_or_else(|_| "{}".to_string()),
    )
}

pub fn memories_message(notes: &[String]) -> String {
    format!("Relevant memories:\n{}", notes.join("\n\n"))
}

pub fn plan_prompt() -> String {
    "Create a short plan with numbered steps and a verification strategy. \
     Put the full plan text in `thought`; include any initial actions that set up the work."
        .to_string()
}

pub fn implement_prompt() -> String {
    "Implement the task. Use tools to read and write files as needed.".to_string()
}

pub fn repair_prompt() -> String {
    "Fix the issues from the last step. Use tools to update files.".to_string()
}

pub fn workspace_listing_message(entries: &[String]) -> String {
    if entries.is_empty() {
        "Workspace listing: (empty)".to_string()
    } else {
        format!("Workspace listing:\n{}", entries.join("\n"))
    }
}

pub fn feedback_message(feedback: &str) -> String {
    format!("Last feedback:\n{feedback}")
}

pub fn correction_message(reason: &str) -> String {
    format!(
        "Your previous response was rejected: {reason}. \
         Respond again with ONLY one valid JSON object matching the action schema. \
         No markdown fences, no commentary, no fields beyond the schema."
    )
}
