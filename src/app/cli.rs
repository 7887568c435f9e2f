#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Run,
    Resume,
    Interactive,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "run" => CliVerb::Run,
        "resume" => CliVerb::Resume,
        "interactive" => CliVerb::Interactive,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  run <task.json>                      Run a task from scratch (resets its workspace)"
            .to_string(),
        "  resume <task-id>                     Continue a task from its persisted state"
            .to_string(),
        "  interactive [dir]                    Start a live session in a project directory"
            .to_string(),
        "  help                                 Show this help".to_string(),
        String::new(),
        "Interactive flags:".to_string(),
        "  --project-root <dir>                 Project directory (default: current directory)"
            .to_string(),
        "  --no-watch                           Do not react to file changes".to_string(),
        "  --test-cmd <cmd>                     Verification command for session tasks"
            .to_string(),
        "  --iteration-limit <n>                Iteration budget for session tasks".to_string(),
        "  --quiet                              Do not print observed file changes".to_string(),
        String::new(),
        "Flags:".to_string(),
        "  --model <name>                       Model name (env: WISP_MODEL)".to_string(),
        "  --base-url <url>                     Ollama base URL (env: WISP_BASE_URL)".to_string(),
        "  --timeout <secs>                     Model request timeout (env: WISP_TIMEOUT)"
            .to_string(),
        "  --verbose                            Print model traffic and phase transitions"
            .to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse() {
        assert_eq!(parse_cli_verb("run"), CliVerb::Run);
        assert_eq!(parse_cli_verb("resume"), CliVerb::Resume);
        assert_eq!(parse_cli_verb("interactive"), CliVerb::Interactive);
        assert_eq!(parse_cli_verb("--help"), CliVerb::Help);
        assert_eq!(parse_cli_verb("deploy"), CliVerb::Unknown);
    }

    #[test]
    fn help_names_every_command_and_flag() {
        let help = help_text();
        for needle in ["run <task.json>", "resume <task-id>", "interactive", "--base-url"] {
            assert!(help.contains(needle), "missing {needle}");
        }
    }
}
