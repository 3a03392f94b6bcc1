use serde::{Deserialize, Serialize};

/// Unique identifier for a session.
pub type SessionId = String;

/// Options accompanying a launch request. Everything is optional; the
/// prompt itself travels separately because it is required.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Session hint forwarded to the agent CLI as `--session-id`.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Model identifier forwarded as `--model`.
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory for the spawned process. Supports a leading `~`.
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Auxiliary MCP configuration payload (JSON string), forwarded verbatim.
    #[serde(default)]
    pub mcp_config: Option<String>,
    /// Whether to pass `--strict-mcp-config` alongside the MCP payload.
    #[serde(default)]
    pub mcp_strict: bool,
    /// Tools the agent may use. Empty means "no filter", not "none allowed".
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tools the agent must not use. Empty means "no filter".
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
}

/// Returned by a successful launch.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Started {
    pub session_id: SessionId,
    pub pid: u32,
}

/// Events delivered on a session's output stream.
///
/// `Line` carries one decoded, terminator-stripped, non-empty line.
/// `Completed` and `Failed` are terminal; exactly one of them ends every
/// stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Line { line: String },
    Completed,
    Failed { message: String },
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Line { .. })
    }
}

/// Error codes for structured error handling at the transport boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    LaunchFailed,
    InvalidWorkingDirectory,
    InvalidRequest,
    StreamDecode,
    ServerError,
}
