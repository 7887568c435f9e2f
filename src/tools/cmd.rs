use super::{io_error, ToolError, Workspace};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_ALLOWLIST: &[&str] = &[
    "python", "python3", "pytest", "pip", "git", "cargo", "rustc", "ruff",
];
const BLOCKED_TOKENS: &[&str] = &["sudo", "doas", "rm -rf", "rm -fr"];
const NETWORK_TOKENS: &[&str] = &["curl", "wget"];
// Too short for a substring scan; matched against the tokenized argv.
const NETWORK_EXES: &[&str] = &["nc"];

/// Execution policy for `run_cmd`. Network-reaching tokens stay blocked
/// unless `allow_network` is set explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdPolicy {
    pub allowlist: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_chars: usize,
    pub allow_network: bool,
}

impl Default for CmdPolicy {
    fn default() -> Self {
        Self {
            allowlist: DEFAULT_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 30,
            max_output_chars: 4000,
            allow_network: false,
        }
    }
}

impl CmdPolicy {
    fn blocked_tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = BLOCKED_TOKENS.to_vec();
        if !self.allow_network {
            tokens.extend_from_slice(NETWORK_TOKENS);
        }
        tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CmdOutput {
    pub exit_code: i32,
    pub output: String,
    pub truncated: bool,
}

/// Validation pipeline, each stage rejecting before any process is spawned:
/// cwd sandbox resolution, leading-executable allowlist, blocked-token scan.
/// The token scan applies to the whole command line, so an allowlisted
/// binary invoked with a blocked flag is still rejected.
pub fn run_cmd(
    workspace: &Workspace,
    cmd: &str,
    cwd: &str,
    policy: &CmdPolicy,
) -> Result<CmdOutput, ToolError> {
    let safe_cwd = workspace.resolve(cwd)?;
    if !safe_cwd.is_dir() {
        return Err(ToolError::NotFound {
            path: safe_cwd.display().to_string(),
        });
    }

    let tokens = split_command(cmd)?;
    let exe = executable_name(&tokens)?;
    if !policy.allowlist.iter().any(|allowed| allowed == &exe) {
        return Err(ToolError::CommandNotAllowed { exe });
    }

    let lowered = cmd.to_ascii_lowercase();
    for token in policy.blocked_tokens() {
        if lowered.contains(token) {
            return Err(ToolError::BlockedToken {
                token: token.to_string(),
            });
        }
    }
    if !policy.allow_network {
        for token in &tokens {
            let name = Path::new(token)
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if NETWORK_EXES.contains(&name.as_str()) {
                return Err(ToolError::BlockedToken { token: name });
            }
        }
    }

    execute(&tokens, &safe_cwd, policy)
}

fn execute(tokens: &[String], cwd: &Path, policy: &CmdPolicy) -> Result<CmdOutput, ToolError> {
    let mut child = Command::new(&tokens[0])
        .args(&tokens[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| io_error(cwd, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(cwd, std::io::Error::other("missing stdout pipe")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(cwd, std::io::Error::other("missing stderr pipe")))?;

    let stdout_reader = thread::spawn(move || {
        let mut buf = String::new();
        let mut stdout = stdout;
        let _ = stdout.read_to_string(&mut buf);
        buf
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = String::new();
        let mut stderr = stderr;
        let _ = stderr.read_to_string(&mut buf);
        buf
    });

    let timeout = Duration::from_secs(policy.timeout_secs);
    let start = Instant::now();
    let exit_status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(ToolError::Timeout {
                        seconds: policy.timeout_secs,
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(io_error(cwd, err)),
        }
    };

    let mut output = stdout_reader.join().unwrap_or_default();
    output.push_str(&stderr_reader.join().unwrap_or_default());
    let truncated = output.chars().count() > policy.max_output_chars;
    if truncated {
        output = output.chars().take(policy.max_output_chars).collect();
        output.push_str("\n...[truncated]");
    }

    Ok(CmdOutput {
        exit_code: exit_status.code().unwrap_or(-1),
        output,
        truncated,
    })
}

fn executable_name(tokens: &[String]) -> Result<String, ToolError> {
    let first = tokens.first().ok_or(ToolError::EmptyCommand)?;
    Ok(Path::new(first)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| first.clone()))
}

/// Quote-aware command splitter. No shell is involved in execution, so this
/// only has to understand plain tokens, single and double quotes, and
/// backslash escapes outside single quotes.
pub fn split_command(cmd: &str) -> Result<Vec<String>, ToolError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = cmd.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ToolError::CommandParse {
                                reason: "unterminated single quote".to_string(),
                            })
                        }
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(ToolError::CommandParse {
                                    reason: "dangling escape in double quote".to_string(),
                                })
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ToolError::CommandParse {
                                reason: "unterminated double quote".to_string(),
                            })
                        }
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(ToolError::CommandParse {
                            reason: "dangling escape".to_string(),
                        })
                    }
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err(ToolError::EmptyCommand);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("open");
        (dir, workspace)
    }

    #[test]
    fn split_command_handles_quotes_and_escapes() {
        let tokens = split_command(r#"python -c "print('hi there')""#).expect("split");
        assert_eq!(tokens, vec!["python", "-c", "print('hi there')"]);
        let tokens = split_command(r"git commit -m 'two words'").expect("split");
        assert_eq!(tokens, vec!["git", "commit", "-m", "two words"]);
    }

    #[test]
    fn split_command_rejects_unterminated_quote() {
        let err = split_command("python -c 'oops").expect_err("should fail");
        assert!(matches!(err, ToolError::CommandParse { .. }));
    }

    #[test]
    fn empty_command_is_rejected() {
        let (_dir, ws) = workspace();
        let err = run_cmd(&ws, "   ", ".", &CmdPolicy::default()).expect_err("should fail");
        assert!(matches!(err, ToolError::EmptyCommand));
    }

    #[test]
    fn unlisted_executable_is_rejected() {
        let (_dir, ws) = workspace();
        let err = run_cmd(&ws, "echo hello", ".", &CmdPolicy::default()).expect_err("should fail");
        assert!(matches!(err, ToolError::CommandNotAllowed { .. }));
    }

    #[test]
    fn blocked_token_beats_allowlist() {
        let (_dir, ws) = workspace();
        let err = run_cmd(&ws, "git sudo-helper", ".", &CmdPolicy::default())
            .expect_err("should fail");
        assert!(matches!(err, ToolError::BlockedToken { .. }));
    }

    #[test]
    fn network_tokens_blocked_by_default_and_opt_in() {
        let (_dir, ws) = workspace();
        let err =
            run_cmd(&ws, "git clone curl-repo", ".", &CmdPolicy::default()).expect_err("blocked");
        assert!(matches!(err, ToolError::BlockedToken { .. }));

        let policy = CmdPolicy {
            allow_network: true,
            ..CmdPolicy::default()
        };
        // With network enabled the same line passes the token scan.
        let outcome = run_cmd(&ws, "git clone curl-repo", ".", &policy);
        assert!(!matches!(outcome, Err(ToolError::BlockedToken { .. })));
    }

    #[test]
    fn netcat_is_blocked_even_as_the_last_token() {
        let (_dir, ws) = workspace();
        let err = run_cmd(&ws, "git fetch-via nc", ".", &CmdPolicy::default())
            .expect_err("should fail");
        assert!(matches!(err, ToolError::BlockedToken { token } if token == "nc"));

        let err = run_cmd(&ws, "git fetch-via /usr/bin/nc", ".", &CmdPolicy::default())
            .expect_err("should fail");
        assert!(matches!(err, ToolError::BlockedToken { token } if token == "nc"));

        let policy = CmdPolicy {
            allow_network: true,
            ..CmdPolicy::default()
        };
        let outcome = run_cmd(&ws, "git fetch-via nc", ".", &policy);
        assert!(!matches!(outcome, Err(ToolError::BlockedToken { .. })));
    }

    #[test]
    fn cwd_escape_is_rejected_before_spawn() {
        let (_dir, ws) = workspace();
        let err = run_cmd(&ws, "python --version", "../..", &CmdPolicy::default())
            .expect_err("should fail");
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
    }

    #[test]
    fn successful_command_captures_output() {
        let (_dir, ws) = workspace();
        let out = run_cmd(&ws, "python3 -c \"print('hi')\"", ".", &CmdPolicy::default())
            .expect("run");
        assert_eq!(out.exit_code, 0);
        assert!(out.output.contains("hi"));
        assert!(!out.truncated);
    }

    #[test]
    fn failing_command_reports_nonzero_exit() {
        let (_dir, ws) = workspace();
        let out = run_cmd(
            &ws,
            "python3 -c \"import sys; sys.exit(3)\"",
            ".",
            &CmdPolicy::default(),
        )
        .expect("run");
        assert_eq!(out.exit_code, 3);
    }

    #[test]
    fn long_output_is_capped_and_flagged() {
        let (_dir, ws) = workspace();
        let policy = CmdPolicy {
            max_output_chars: 100,
            ..CmdPolicy::default()
        };
        let out = run_cmd(&ws, "python3 -c \"print('x' * 1000)\"", ".", &policy).expect("run");
        assert!(out.truncated);
        assert!(out.output.ends_with("...[truncated]"));
    }

    #[test]
    fn timeout_kills_the_process() {
        let (_dir, ws) = workspace();
        let policy = CmdPolicy {
            timeout_secs: 1,
            ..CmdPolicy::default()
        };
        let start = Instant::now();
        let err = run_cmd(
            &ws,
            "python3 -c \"import time; time.sleep(30)\"",
            ".",
            &policy,
        )
        .expect_err("should time out");
        assert!(matches!(err, ToolError::Timeout { seconds: 1 }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
