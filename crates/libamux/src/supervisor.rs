use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::timeout;
use tracing::{debug, info};

use amux_protocol::SessionId;

use crate::command::CommandSpec;
use crate::error::AmuxError;

/// How a terminate call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process had already exited (or was already reaped); no-op.
    AlreadyExited,
    /// The process exited within the grace period after SIGTERM.
    Graceful,
    /// The grace period elapsed and the process was SIGKILLed.
    Forced,
}

/// Spawn the agent process with a sanitized environment and piped stdio.
///
/// Both output pipes must be drained by the caller; an undrained pipe
/// stalls the child once its OS buffer fills.
pub fn spawn_agent(
    spec: &CommandSpec,
    env: HashMap<String, String>,
    cwd: Option<&Path>,
) -> Result<Child, AmuxError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(AmuxError::LaunchFailure)?;
    info!(
        program = %spec.program,
        pid = child.id().unwrap_or(0),
        "agent process spawned"
    );
    Ok(child)
}

/// Consume stderr in the background so the child never blocks on it.
/// Lines are logged at debug; the stream's framing only covers stdout.
pub fn drain_stderr(stderr: ChildStderr, session_id: SessionId) {
    tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(session_id = %session_id, "stderr: {line}");
        }
    });
}

/// Terminate a child process with escalation.
///
/// Running → SIGTERM → wait up to `grace` → SIGKILL + reap. Idempotent:
/// terminating an already-exited or already-reaped process is a no-op.
/// Only an OS-level failure to signal or kill is an error.
pub async fn terminate(child: &mut Child, grace: Duration) -> Result<TerminationOutcome, AmuxError> {
    if child.try_wait()?.is_some() {
        return Ok(TerminationOutcome::AlreadyExited);
    }

    let Some(pid) = child.id() else {
        // Exit status already collected elsewhere.
        return Ok(TerminationOutcome::AlreadyExited);
    };

    send_sigterm(pid)?;
    debug!(pid, grace_ms = grace.as_millis() as u64, "sent SIGTERM");

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid, exit_code = status.code(), "process exited gracefully");
            Ok(TerminationOutcome::Graceful)
        }
        Ok(Err(e)) => Err(AmuxError::Io(e)),
        Err(_) => {
            // Grace elapsed; kill() delivers SIGKILL and waits for the OS
            // to confirm the process has been reaped.
            child
                .kill()
                .await
                .map_err(|source| AmuxError::KillFailed { pid, source })?;
            info!(pid, "process force-killed after grace period");
            Ok(TerminationOutcome::Forced)
        }
    }
}

fn send_sigterm(pid: u32) -> Result<(), AmuxError> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // ESRCH: the process exited between try_wait and here.
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(AmuxError::KillFailed { pid, source: err })
}
