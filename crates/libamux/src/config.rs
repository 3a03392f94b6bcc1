use std::time::Duration;

/// Configuration for launching the external agent CLI.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path or name of the agent binary, resolved via PATH when bare.
    pub cli_path: String,
    /// Use subscription authentication instead of an ambient API key.
    pub use_subscription: bool,
    /// Name of the credential variable stripped from the child environment.
    pub credential_var: String,
    /// Emit `--include-partial-messages` for fine-grained streaming.
    pub include_partial_messages: bool,
    /// Grace period between SIGTERM and SIGKILL when stopping a session.
    pub default_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            use_subscription: true,
            credential_var: "ANTHROPIC_API_KEY".to_string(),
            include_partial_messages: true,
            default_grace: Duration::from_secs(5),
        }
    }
}
