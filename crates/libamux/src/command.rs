use amux_protocol::LaunchOptions;

use crate::config::RunnerConfig;

/// An assembled command: program path plus discrete arguments.
///
/// Arguments are always passed as a typed vector, never joined into a
/// shell string, so prompt content cannot be reinterpreted as extra
/// flags or command separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Build the agent CLI argument vector for a launch request.
///
/// Flag order is a contract: fixed base flags first, then optionals in a
/// stable relative order so equal inputs always produce the same argv.
pub fn assemble(config: &RunnerConfig, prompt: &str, options: &LaunchOptions) -> CommandSpec {
    let mut args = vec![
        "-p".to_string(),
        prompt.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        // Required by stream-json output.
        "--verbose".to_string(),
    ];

    if config.include_partial_messages {
        args.push("--include-partial-messages".to_string());
    }

    if let Some(session_id) = &options.session_id {
        args.push("--session-id".to_string());
        args.push(session_id.clone());
    }

    if let Some(model) = &options.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }

    if !options.allowed_tools.is_empty() {
        args.push("--allowed-tools".to_string());
        args.push(options.allowed_tools.join(","));
    }

    if !options.disallowed_tools.is_empty() {
        args.push("--disallowed-tools".to_string());
        args.push(options.disallowed_tools.join(","));
    }

    if let Some(mcp_config) = &options.mcp_config {
        args.push("--mcp-config".to_string());
        args.push(mcp_config.clone());
        if options.mcp_strict {
            args.push("--strict-mcp-config".to_string());
        }
    }

    CommandSpec {
        program: config.cli_path.clone(),
        args,
    }
}
