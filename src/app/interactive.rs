use crate::app::handlers::render_outcome;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::shared::ids::interactive_task_id;
use crate::task::Task;
use crate::watch::FileWatcher;
use chrono::Utc;
use serde_json::{json, Map};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

const SESSION_HELP: &str = "Type a goal to run it as a task.\n\
Session commands:\n\
  /help          Show this help\n\
  /watch on|off  Toggle reacting to file changes\n\
  /exit          Leave the session";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub project_root: PathBuf,
    pub watch: bool,
    pub quiet: bool,
    pub test_cmd: Option<String>,
    pub iteration_limit: Option<u32>,
    pub verbose: bool,
}

enum Event {
    Line(String),
    Changes(Vec<String>),
    Eof,
}

fn default_ignore_dirs() -> Vec<String> {
    ["target", "node_modules", "__pycache__", "venv", "workspaces"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Live session against an existing project directory. The project root is
/// the workspace and is never reset; run artifacts go under
/// `.wisp/workspaces/<task-id>`. Typed goals become tasks; while watching,
/// each debounced batch of file changes synthesizes a micro-task through
/// the same state machine.
pub fn run_session(options: &SessionOptions, settings: &Settings) -> Result<String, String> {
    if !options.project_root.is_dir() {
        return Err(format!(
            "not a directory: {}",
            options.project_root.display()
        ));
    }
    let project_root = options
        .project_root
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", options.project_root.display()))?;
    let wisp_root = project_root.join(".wisp");

    let mut orchestrator = Orchestrator::new(&wisp_root, settings).map_err(|e| e.to_string())?;
    orchestrator.set_verbose(options.verbose);

    let (tx, rx) = mpsc::channel::<Event>();
    let stop = Arc::new(AtomicBool::new(false));
    let mut watcher_handle = None;
    if options.watch {
        watcher_handle = Some(spawn_watcher(&project_root, stop.clone(), tx.clone()));
    }
    spawn_stdin_reader(tx);

    let mut out = io::stdout();
    let mut watching = options.watch;
    writeln!(out, "wisp interactive session in {}", project_root.display())
        .map_err(|e| e.to_string())?;
    writeln!(out, "{SESSION_HELP}").map_err(|e| e.to_string())?;

    loop {
        write!(out, "wisp> ").and_then(|_| out.flush()).map_err(|e| e.to_string())?;
        let event = match rx.recv() {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            Event::Eof => break,
            Event::Line(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if let Some(command) = line.strip_prefix('/') {
                    match handle_command(command, &mut watching) {
                        CommandOutcome::Exit => break,
                        CommandOutcome::Reply(reply) => {
                            writeln!(out, "{reply}").map_err(|e| e.to_string())?;
                        }
                    }
                    continue;
                }
                let task = goal_task(&line, options);
                if run_one(&orchestrator, &task, &project_root, &wisp_root, &rx, &mut out)? {
                    break;
                }
            }
            Event::Changes(changes) => {
                if !watching {
                    continue;
                }
                if !options.quiet {
                    writeln!(out, "observed changes:\n{}", changes.join("\n"))
                        .map_err(|e| e.to_string())?;
                }
                let task = change_task(&changes, options);
                if run_one(&orchestrator, &task, &project_root, &wisp_root, &rx, &mut out)? {
                    break;
                }
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = watcher_handle {
        let _ = handle.join();
    }
    Ok("session ended".to_string())
}

enum CommandOutcome {
    Exit,
    Reply(String),
}

fn handle_command(command: &str, watching: &mut bool) -> CommandOutcome {
    match command.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["exit"] | ["quit"] => CommandOutcome::Exit,
        ["help"] => CommandOutcome::Reply(SESSION_HELP.to_string()),
        ["watch", "on"] => {
            *watching = true;
            CommandOutcome::Reply("file watching on".to_string())
        }
        ["watch", "off"] => {
            *watching = false;
            CommandOutcome::Reply("file watching off".to_string())
        }
        _ => CommandOutcome::Reply(format!("unknown session command `/{command}`")),
    }
}

/// Runs one task and drains events that queued up meanwhile; changes seen
/// while the task ran are the agent's own edits. Returns true when stdin
/// closed during the run.
fn run_one(
    orchestrator: &Orchestrator,
    task: &Task,
    project_root: &Path,
    wisp_root: &Path,
    rx: &mpsc::Receiver<Event>,
    out: &mut impl Write,
) -> Result<bool, String> {
    let artifacts_root = wisp_root.join("workspaces").join(&task.id);
    let line = match orchestrator.run_task_with_roots(task, project_root, &artifacts_root) {
        Ok(outcome) => render_outcome(&outcome),
        Err(err) => format!("task failed: {err}"),
    };
    writeln!(out, "{line}").map_err(|e| e.to_string())?;
    let mut saw_eof = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::Eof) {
            saw_eof = true;
        }
    }
    Ok(saw_eof)
}

fn spawn_watcher(
    root: &Path,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<Event>,
) -> thread::JoinHandle<()> {
    let root = root.to_path_buf();
    thread::spawn(move || {
        let mut watcher = FileWatcher::new(&root, default_ignore_dirs());
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            let changes = watcher.poll();
            if !changes.is_empty() && tx.send(Event::Changes(changes)).is_err() {
                break;
            }
        }
    })
}

fn spawn_stdin_reader(tx: mpsc::Sender<Event>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let event = match line {
                Ok(line) => Event::Line(line),
                Err(_) => Event::Eof,
            };
            if tx.send(event).is_err() {
                return;
            }
        }
        let _ = tx.send(Event::Eof);
    });
}

fn goal_task(goal: &str, options: &SessionOptions) -> Task {
    Task {
        id: interactive_task_id(Utc::now()),
        title: goal.chars().take(60).collect(),
        goal: goal.to_string(),
        constraints: session_constraints(options),
        context: Map::new(),
    }
}

fn change_task(changes: &[String], options: &SessionOptions) -> Task {
    let mut context = Map::new();
    context.insert(
        "notes".to_string(),
        json!(format!("Recent file changes:\n{}", changes.join("\n"))),
    );
    Task {
        id: interactive_task_id(Utc::now()),
        title: "react to file changes".to_string(),
        goal: "Project files changed. Review the listed changes and make the project's checks pass."
            .to_string(),
        constraints: session_constraints(options),
        context,
    }
}

fn session_constraints(options: &SessionOptions) -> Map<String, serde_json::Value> {
    let mut constraints = Map::new();
    if let Some(cmd) = &options.test_cmd {
        constraints.insert("test_cmd".to_string(), json!(cmd));
    }
    if let Some(limit) = options.iteration_limit {
        constraints.insert("iteration_limit".to_string(), json!(limit));
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SessionOptions {
        SessionOptions {
            project_root: PathBuf::from("."),
            watch: true,
            quiet: false,
            test_cmd: Some("pytest -q".to_string()),
            iteration_limit: Some(3),
            verbose: false,
        }
    }

    #[test]
    fn goal_task_gets_a_live_id_and_session_constraints() {
        let task = goal_task("fix the parser", &options());
        assert!(task.id.starts_with("live_"));
        assert_eq!(task.goal, "fix the parser");
        assert_eq!(task.test_cmd(), Some("pytest -q"));
        assert_eq!(task.iteration_limit(), 3);
    }

    #[test]
    fn change_task_carries_the_change_batch_as_context() {
        let task = change_task(&["modified: src/lib.rs".to_string()], &options());
        assert!(task.context_notes().contains("modified: src/lib.rs"));
        assert!(task.goal.contains("checks pass"));
    }

    #[test]
    fn commands_toggle_watching_and_exit() {
        let mut watching = true;
        assert!(matches!(
            handle_command("watch off", &mut watching),
            CommandOutcome::Reply(_)
        ));
        assert!(!watching);
        assert!(matches!(
            handle_command("watch on", &mut watching),
            CommandOutcome::Reply(_)
        ));
        assert!(watching);
        assert!(matches!(
            handle_command("exit", &mut watching),
            CommandOutcome::Exit
        ));
        let CommandOutcome::Reply(reply) = handle_command("oops", &mut watching) else {
            panic!("expected reply");
        };
        assert!(reply.contains("/oops"));
    }
}
