use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::interactive;
use crate::config::{Settings, SettingsOverrides};
use crate::orchestrator::{Orchestrator, RunOutcome, Terminal};
use std::path::{Path, PathBuf};

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Run => cmd_run(&args[1..]),
        CliVerb::Resume => cmd_resume(&args[1..]),
        CliVerb::Interactive => cmd_interactive(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedArgs {
    positionals: Vec<String>,
    overrides: SettingsOverrides,
    verbose: bool,
    project_root: Option<String>,
    no_watch: bool,
    quiet: bool,
    test_cmd: Option<String>,
    iteration_limit: Option<u32>,
}

/// Session flags are only meaningful for `interactive`; the other verbs
/// reject them.
fn parse_args(args: &[String], session_flags: bool) -> Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--model" => parsed.overrides.model = Some(flag_value(&mut iter, "--model")?),
            "--base-url" => parsed.overrides.base_url = Some(flag_value(&mut iter, "--base-url")?),
            "--timeout" => {
                let raw = flag_value(&mut iter, "--timeout")?;
                let secs = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| format!("invalid --timeout `{raw}`: expected seconds"))?;
                parsed.overrides.timeout_secs = Some(secs);
            }
            "--verbose" | "-v" => parsed.verbose = true,
            "--project-root" if session_flags => {
                parsed.project_root = Some(flag_value(&mut iter, "--project-root")?);
            }
            "--no-watch" if session_flags => parsed.no_watch = true,
            "--quiet" if session_flags => parsed.quiet = true,
            "--test-cmd" if session_flags => {
                parsed.test_cmd = Some(flag_value(&mut iter, "--test-cmd")?);
            }
            "--iteration-limit" if session_flags => {
                let raw = flag_value(&mut iter, "--iteration-limit")?;
                let limit = raw
                    .parse::<u32>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| format!("invalid --iteration-limit `{raw}`"))?;
                parsed.iteration_limit = Some(limit);
            }
            other if other.starts_with('-') => return Err(format!("unknown flag `{other}`")),
            other => parsed.positionals.push(other.to_string()),
        }
    }
    Ok(parsed)
}

fn flag_value<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<String, String> {
    iter.next()
        .map(|v| v.to_string())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn cmd_run(args: &[String]) -> Result<String, String> {
    let parsed = parse_args(args, false)?;
    let [task_path] = parsed.positionals.as_slice() else {
        return Err("usage: wisp run <task.json> [--model M] [--base-url U] [--timeout S]".into());
    };
    let orchestrator = build_orchestrator(&parsed)?;
    let outcome = orchestrator
        .run_task(Path::new(task_path))
        .map_err(|e| e.to_string())?;
    Ok(render_outcome(&outcome))
}

fn cmd_resume(args: &[String]) -> Result<String, String> {
    let parsed = parse_args(args, false)?;
    let [task_id] = parsed.positionals.as_slice() else {
        return Err("usage: wisp resume <task-id> [--model M] [--base-url U] [--timeout S]".into());
    };
    let orchestrator = build_orchestrator(&parsed)?;
    let outcome = orchestrator
        .resume_task(task_id)
        .map_err(|e| e.to_string())?;
    Ok(render_outcome(&outcome))
}

fn cmd_interactive(args: &[String]) -> Result<String, String> {
    let parsed = parse_args(args, true)?;
    let project_root = match (parsed.project_root.as_deref(), parsed.positionals.as_slice()) {
        (Some(dir), []) => PathBuf::from(dir),
        (None, []) => current_dir()?,
        (None, [dir]) => PathBuf::from(dir),
        _ => return Err("usage: wisp interactive [--project-root DIR] [--no-watch] [--test-cmd CMD] [--iteration-limit N] [--quiet]".into()),
    };
    let settings = Settings::resolve(&parsed.overrides).map_err(|e| e.to_string())?;
    let options = interactive::SessionOptions {
        project_root,
        watch: !parsed.no_watch,
        quiet: parsed.quiet,
        test_cmd: parsed.test_cmd.clone(),
        iteration_limit: parsed.iteration_limit,
        verbose: parsed.verbose,
    };
    interactive::run_session(&options, &settings)
}

fn build_orchestrator(parsed: &ParsedArgs) -> Result<Orchestrator, String> {
    let settings = Settings::resolve(&parsed.overrides).map_err(|e| e.to_string())?;
    let repo_root = current_dir()?;
    let mut orchestrator = Orchestrator::new(&repo_root, &settings).map_err(|e| e.to_string())?;
    orchestrator.set_verbose(parsed.verbose);
    Ok(orchestrator)
}

fn current_dir() -> Result<PathBuf, String> {
    std::env::current_dir().map_err(|e| format!("cannot determine current directory: {e}"))
}

pub(crate) fn render_outcome(outcome: &RunOutcome) -> String {
    match outcome.terminal {
        Some(Terminal::Success) => format!(
            "task {} finished: success after {} iteration(s)",
            outcome.task_id, outcome.iteration
        ),
        Some(Terminal::IterationLimit) => format!(
            "task {} stopped: iteration limit reached after {} iteration(s)",
            outcome.task_id, outcome.iteration
        ),
        Some(Terminal::Error) => format!(
            "task {} halted with an error at phase {} (iteration {})",
            outcome.task_id, outcome.phase, outcome.iteration
        ),
        None => format!(
            "task {} paused at phase {} (iteration {}); continue with `wisp resume {}`",
            outcome.task_id, outcome.phase, outcome.iteration, outcome.task_id
        ),
    }
}
