use crate::config::Settings;
use crate::memory::{LessonNote, MemoryError, MemoryRecall, MemoryStore, DEFAULT_RETRIEVE_LIMIT};
use crate::model::{ChatMessage, ModelAdapter, ModelError, OllamaClient};
use crate::schema::{parse_action_response, Action};
use crate::task::{Task, TaskError};
use crate::tools::{self, CmdPolicy, ToolError, Workspace};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod artifacts;
pub mod prompts;
pub mod state;

pub use artifacts::{ActionResult, RunArtifacts};
pub use state::{Phase, RunState, StateStore, Terminal};

const FEEDBACK_OUTPUT_CAP: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("workspace setup failed: {0}")]
    Workspace(#[from] ToolError),
    #[error("no run found for task `{task_id}`; run it before resuming")]
    MissingTask { task_id: String },
    #[error("test command `{cmd}` was rejected by the command sandbox: {reason}")]
    TestCommandRejected { cmd: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Cooperative abort. Checked between iterations, before the next model
/// call; a running command is never interrupted short of its timeout.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub task_id: String,
    pub phase: Phase,
    pub iteration: u32,
    pub terminal: Option<Terminal>,
}

impl RunOutcome {
    fn from_state(state: &RunState) -> Self {
        Self {
            task_id: state.task_id.clone(),
            phase: state.phase,
            iteration: state.iteration,
            terminal: state.terminal,
        }
    }
}

/// Owns the phase state machine. Each iteration builds a prompt, calls the
/// model adapter, validates the response, executes the resulting actions
/// through the sandboxed tools and decides the next phase. Single-threaded
/// and sequential; nothing in a batch runs concurrently.
pub struct Orchestrator {
    repo_root: PathBuf,
    model: Box<dyn ModelAdapter>,
    memory: Box<dyn MemoryRecall>,
    policy: CmdPolicy,
    abort: AbortFlag,
    verbose: bool,
}

impl Orchestrator {
    pub fn new(repo_root: &Path, settings: &Settings) -> Result<Self, OrchestratorError> {
        let model = OllamaClient::new(&settings.base_url, &settings.model, settings.timeout());
        let memory = MemoryStore::open(repo_root.join("memories"))?;
        Ok(Self::with_components(
            repo_root,
            Box::new(model),
            Box::new(memory),
        ))
    }

    pub fn with_components(
        repo_root: &Path,
        model: Box<dyn ModelAdapter>,
        memory: Box<dyn MemoryRecall>,
    ) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            model,
            memory,
            policy: CmdPolicy::default(),
            abort: AbortFlag::default(),
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_policy(&mut self, policy: CmdPolicy) {
        self.policy = policy;
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.repo_root.join("workspaces")
    }

    /// `run`: destructive reset of the run directory for this task
    /// identifier, then execute from INGEST.
    pub fn run_task(&self, task_path: &Path) -> Result<RunOutcome, OrchestratorError> {
        let task = Task::load(task_path)?;
        let run_root = self.workspaces_root().join(&task.id);
        let artifacts = RunArtifacts::reset(&run_root, &task)?;
        self.run_loop(&task, &run_root, artifacts, RunState::new(&task.id))
    }

    /// Interactive-mode entry: the workspace is an existing project root
    /// and is never reset; only the artifact directory is.
    pub fn run_task_with_roots(
        &self,
        task: &Task,
        workspace_root: &Path,
        artifacts_root: &Path,
    ) -> Result<RunOutcome, OrchestratorError> {
        let artifacts = RunArtifacts::reset(artifacts_root, task)?;
        self.run_loop(task, workspace_root, artifacts, RunState::new(&task.id))
    }

    /// `resume`: load the persisted RunState and continue from the
    /// recorded phase. Never resets the counter or destroys artifacts.
    pub fn resume_task(&self, task_id: &str) -> Result<RunOutcome, OrchestratorError> {
        let run_root = self.workspaces_root().join(task_id);
        if !run_root.join("task.json").is_file() {
            return Err(OrchestratorError::MissingTask {
                task_id: task_id.to_string(),
            });
        }
        let artifacts = RunArtifacts::open(&run_root)?;
        let task = Task::load(&artifacts.task_path())?;
        let store = StateStore::new(artifacts.state_path());
        let state = if store.exists() {
            store.load()?
        } else {
            RunState::new(task_id)
        };
        self.run_loop(&task, &run_root, artifacts, state)
    }

    fn run_loop(
        &self,
        task: &Task,
        workspace_root: &Path,
        artifacts: RunArtifacts,
        mut state: RunState,
    ) -> Result<RunOutcome, OrchestratorError> {
        let limit = task.iteration_limit();
        let store = StateStore::new(artifacts.state_path());
        let workspace = Workspace::open(workspace_root)?;

        let mut base = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::initial_context(task, workspace.root())),
        ];
        let memory_query = format!("{} {} {}", task.title, task.goal, task.context_notes());
        let notes = self.memory.retrieve(&memory_query, DEFAULT_RETRIEVE_LIMIT)?;
        if !notes.is_empty() {
            base.push(ChatMessage::user(prompts::memories_message(&notes)));
        }

        loop {
            if state.terminal.is_some() || state.phase.is_terminal() {
                break;
            }
            match state.phase {
                Phase::Ingest => {
                    state.phase = Phase::Plan;
                    self.commit(&store, &artifacts, &state)?;
                }
                Phase::Plan | Phase::Implement | Phase::Repair => {
                    // Budget check happens before a new model call is issued.
                    if state.iteration >= limit {
                        state.phase = Phase::IterationLimitExceeded;
                        state.terminal = Some(Terminal::IterationLimit);
                        state.last_result = Some("iteration_limit".to_string());
                        self.finish(task, &workspace, &store, &artifacts, &state)?;
                        break;
                    }
                    if self.abort.is_set() {
                        self.commit(&store, &artifacts, &state)?;
                        return Ok(RunOutcome::from_state(&state));
                    }
                    self.model_round(task, &workspace, &store, &artifacts, &base, &mut state)?;
                }
                Phase::Verify => {
                    self.verify_round(task, &workspace, &store, &artifacts, &mut state)?;
                }
                Phase::Done | Phase::IterationLimitExceeded => break,
            }
        }

        Ok(RunOutcome::from_state(&state))
    }

    fn model_round(
        &self,
        task: &Task,
        workspace: &Workspace,
        store: &StateStore,
        artifacts: &RunArtifacts,
        base: &[ChatMessage],
        state: &mut RunState,
    ) -> Result<(), OrchestratorError> {
        let phase = state.phase;
        let mut turn = base.to_vec();
        if matches!(phase, Phase::Implement | Phase::Repair) {
            let listing = tools::list_dir(workspace, ".").unwrap_or_default();
            turn.push(ChatMessage::user(prompts::workspace_listing_message(
                &listing,
            )));
        }
        if !state.last_feedback.is_empty() {
            turn.push(ChatMessage::user(prompts::feedback_message(
                &state.last_feedback,
            )));
        }
        let prompt = match phase {
            Phase::Plan => prompts::plan_prompt(),
            Phase::Repair => prompts::repair_prompt(),
            _ => prompts::implement_prompt(),
        };
        turn.push(ChatMessage::user(prompt));

        artifacts.log_request(&turn)?;
        let text = match self.model.chat(&turn) {
            Ok(text) => text,
            Err(err) => {
                // Adapter failures are fatal to the run; persist a
                // resumable snapshot and a lesson before surfacing.
                state.terminal = Some(Terminal::Error);
                state.last_result = Some("model_error".to_string());
                state.last_feedback = err.to_string();
                self.finish(task, workspace, store, artifacts, state)?;
                return Err(err.into());
            }
        };
        artifacts.log_response(&text)?;
        self.trace("model response", &text);
        state.last_response = Some(text.clone());

        match parse_action_response(&text) {
            Ok(response) => {
                if phase == Phase::Plan {
                    artifacts.write_plan(&response.thought)?;
                }
                let batch = self.execute_batch(workspace, &response.actions, artifacts)?;
                state.record_touched(&batch.touched);
                state.last_feedback = batch.formatted();
                let (next, label) = match phase {
                    Phase::Plan if batch.had_errors => (Phase::Repair, "plan_failed"),
                    Phase::Plan => (Phase::Implement, "plan_ok"),
                    Phase::Implement if batch.had_errors => (Phase::Verify, "implement_failed"),
                    Phase::Implement => (Phase::Verify, "implement_ok"),
                    _ if batch.had_errors => (Phase::Verify, "repair_failed"),
                    _ => (Phase::Verify, "repair_ok"),
                };
                state.phase = next;
                state.last_result = Some(label.to_string());
            }
            Err(err) => {
                // No-op round: nothing executes, the budget is consumed,
                // the next prompt carries an explicit correction.
                artifacts.log_parse_error(&err.to_string())?;
                state.last_feedback = prompts::correction_message(&err.to_string());
                state.last_result = Some("invalid_response".to_string());
            }
        }

        state.iteration += 1;
        self.commit(store, artifacts, state)
    }

    fn verify_round(
        &self,
        task: &Task,
        workspace: &Workspace,
        store: &StateStore,
        artifacts: &RunArtifacts,
        state: &mut RunState,
    ) -> Result<(), OrchestratorError> {
        let Some(cmd) = task.test_cmd() else {
            state.phase = Phase::Done;
            state.terminal = Some(Terminal::Success);
            state.last_result = Some("no_test_cmd".to_string());
            return self.finish(task, workspace, store, artifacts, state);
        };

        let action = Action::RunCmd {
            cmd: cmd.to_string(),
            cwd: ".".to_string(),
        };
        match tools::run_cmd(workspace, cmd, ".", &self.policy) {
            Ok(out) => {
                let passed = out.exit_code == 0;
                artifacts.log_action(&ActionResult::completed(
                    &action,
                    passed,
                    json!({ "exit_code": out.exit_code, "output": out.output }),
                    out.truncated,
                ))?;
                state.last_feedback = out.output;
                if passed {
                    state.phase = Phase::Done;
                    state.terminal = Some(Terminal::Success);
                    state.last_result = Some("tests_passed".to_string());
                    self.finish(task, workspace, store, artifacts, state)
                } else {
                    state.phase = Phase::Repair;
                    state.last_result = Some("tests_failed".to_string());
                    self.commit(store, artifacts, state)
                }
            }
            Err(err) if err.is_fatal() => {
                // A test command the sandbox rejects can never pass; halt
                // with a diagnosable state instead of looping.
                artifacts.log_action(&ActionResult::failure(&action, err.to_string()))?;
                state.terminal = Some(Terminal::Error);
                state.last_result = Some("test_cmd_rejected".to_string());
                state.last_feedback = err.to_string();
                self.finish(task, workspace, store, artifacts, state)?;
                Err(OrchestratorError::TestCommandRejected {
                    cmd: cmd.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                // Timeout and ordinary tool failures are repairable.
                artifacts.log_action(&ActionResult::failure(&action, err.to_string()))?;
                state.last_feedback = err.to_string();
                state.phase = Phase::Repair;
                state.last_result = Some("tests_failed".to_string());
                self.commit(store, artifacts, state)
            }
        }
    }

    fn execute_batch(
        &self,
        workspace: &Workspace,
        actions: &[Action],
        artifacts: &RunArtifacts,
    ) -> Result<BatchOutcome, OrchestratorError> {
        let mut outcome = BatchOutcome::default();
        for action in actions {
            if let Some(reason) = placeholder_error(action) {
                let record = ActionResult::failure(action, reason);
                artifacts.log_action(&record)?;
                outcome.push(record, true);
                continue;
            }
            match self.dispatch(workspace, action) {
                Ok(record) => {
                    if let (Action::WriteFile { path, .. }, true) = (action, record.success) {
                        outcome.touched.push(path.clone());
                    }
                    artifacts.log_action(&record)?;
                    outcome.push(record, false);
                }
                Err(err) => {
                    let fatal = err.is_fatal();
                    let record = ActionResult::failure(action, err.to_string());
                    artifacts.log_action(&record)?;
                    outcome.push(record, true);
                    if fatal {
                        // Sandbox violations abort the rest of the batch.
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }

    fn dispatch(&self, workspace: &Workspace, action: &Action) -> Result<ActionResult, ToolError> {
        match action {
            Action::WriteFile { path, content } => {
                let message = tools::write_file(workspace, path, content)?;
                Ok(ActionResult::success(action, json!(message), false))
            }
            Action::ReadFile { path } => {
                let content = tools::read_file(workspace, path)?;
                Ok(ActionResult::success(action, json!(content), false))
            }
            Action::ListDir { path } => {
                let entries = tools::list_dir(workspace, path)?;
                Ok(ActionResult::success(action, json!(entries), false))
            }
            Action::SearchInFiles { path, query } => {
                let matches = tools::search_in_files(workspace, path, query)?;
                Ok(ActionResult::success(
                    action,
                    serde_json::to_value(matches).unwrap_or(Value::Null),
                    false,
                ))
            }
            Action::RunCmd { cmd, cwd } => {
                let out = tools::run_cmd(workspace, cmd, cwd, &self.policy)?;
                Ok(ActionResult::completed(
                    action,
                    out.exit_code == 0,
                    json!({ "exit_code": out.exit_code, "output": out.output }),
                    out.truncated,
                ))
            }
        }
    }

    fn commit(
        &self,
        store: &StateStore,
        artifacts: &RunArtifacts,
        state: &RunState,
    ) -> Result<(), OrchestratorError> {
        store.save(state)?;
        artifacts.log_phase_line(&format!(
            "ts={} task={} phase={} iteration={} result={}",
            Utc::now().timestamp(),
            state.task_id,
            state.phase,
            state.iteration,
            state.last_result.as_deref().unwrap_or("-"),
        ));
        Ok(())
    }

    /// Terminal bookkeeping: persist the final snapshot and write exactly
    /// one lesson note for the run.
    fn finish(
        &self,
        task: &Task,
        workspace: &Workspace,
        store: &StateStore,
        artifacts: &RunArtifacts,
        state: &RunState,
    ) -> Result<(), OrchestratorError> {
        self.commit(store, artifacts, state)?;
        let outcome = state
            .terminal
            .map(|t| t.to_string())
            .unwrap_or_else(|| "error".to_string());
        let note = LessonNote {
            task_id: task.id.clone(),
            timestamp: Utc::now(),
            summary: format!(
                "Task {} finished with result {}.\nFiles touched: {}\nWorkspace: {}",
                task.id,
                state.last_result.as_deref().unwrap_or("unknown"),
                state.files_touched.join(", "),
                workspace.root().display(),
            ),
            outcome,
        };
        self.memory.store(&note)?;
        Ok(())
    }

    fn trace(&self, label: &str, message: &str) {
        if !self.verbose {
            return;
        }
        let mut trimmed = message.to_string();
        if trimmed.chars().count() > FEEDBACK_OUTPUT_CAP {
            trimmed = trimmed.chars().take(FEEDBACK_OUTPUT_CAP).collect();
            trimmed.push_str("\n...[truncated]");
        }
        println!("[wisp] {label}:\n{trimmed}\n");
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    results: Vec<Value>,
    touched: Vec<String>,
    had_errors: bool,
}

impl BatchOutcome {
    fn push(&mut self, record: ActionResult, is_error: bool) {
        let mut summary = json!({
            "tool": record.tool,
            "success": record.success,
            "output": cap_value(record.output),
        });
        if let Some(error) = record.error {
            summary["error"] = json!(error);
        }
        self.results.push(summary);
        if is_error {
            self.had_errors = true;
        }
    }

    fn formatted(&self) -> String {
        serde_json::to_string_pretty(&self.results).unwrap_or_else(|_| "[]".to_string())
    }
}

fn cap_value(value: Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > FEEDBACK_OUTPUT_CAP => {
            let mut capped: String = s.chars().take(FEEDBACK_OUTPUT_CAP).collect();
            capped.push_str("\n...[truncated]");
            Value::String(capped)
        }
        other => other,
    }
}

fn placeholder_error(action: &Action) -> Option<String> {
    let is_placeholder = |value: &str| {
        let stripped = value.trim();
        stripped.is_empty() || stripped == "..."
    };
    match action {
        Action::WriteFile { path, .. } if is_placeholder(path) => {
            Some("write_file path is missing or placeholder".to_string())
        }
        Action::ReadFile { path } if is_placeholder(path) => {
            Some("read_file path is missing or placeholder".to_string())
        }
        Action::ListDir { path } if is_placeholder(path) => {
            Some("list_dir path is missing or placeholder".to_string())
        }
        Action::SearchInFiles { path, query } if is_placeholder(path) || is_placeholder(query) => {
            Some("search_in_files path/query is missing or placeholder".to_string())
        }
        Action::RunCmd { cmd, cwd } if is_placeholder(cmd) || is_placeholder(cwd) => {
            Some("run_cmd cmd/cwd is missing or placeholder".to_string())
        }
        _ => None,
    }
}
