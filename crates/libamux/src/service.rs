use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use amux_protocol::{LaunchOptions, SessionId, Started, StreamEvent};

use crate::command::assemble;
use crate::config::RunnerConfig;
use crate::env::{build_environment, resolve_working_dir};
use crate::error::AmuxError;
use crate::registry::SessionRegistry;
use crate::stream::{self, PumpOutcome, STREAM_CHANNEL_CAPACITY};
use crate::supervisor::{drain_stderr, spawn_agent, terminate};

/// Boundary surface of the core: everything the transport layer calls.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct AgentService {
    config: Arc<RunnerConfig>,
    registry: Arc<SessionRegistry>,
}

impl AgentService {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Launch an agent process and register it under a fresh session id.
    ///
    /// The working directory is validated before any spawn attempt; spawn
    /// failures surface synchronously and leave nothing behind.
    pub fn start_session(
        &self,
        prompt: &str,
        options: &LaunchOptions,
    ) -> Result<Started, AmuxError> {
        if prompt.trim().is_empty() {
            return Err(AmuxError::EmptyPrompt);
        }

        let cwd: Option<PathBuf> = options
            .working_directory
            .as_deref()
            .map(resolve_working_dir)
            .transpose()?;

        let env = build_environment(&self.config);
        let spec = assemble(&self.config, prompt, options);

        let mut child = spawn_agent(&spec, env, cwd.as_deref())?;
        let stderr = child.stderr.take();

        let session = self.registry.register(child)?;
        if let Some(stderr) = stderr {
            drain_stderr(stderr, session.id.clone());
        }

        info!(
            session_id = %session.id,
            pid = session.pid,
            model = options.model.as_deref().unwrap_or("default"),
            "session started"
        );

        Ok(Started {
            session_id: session.id,
            pid: session.pid,
        })
    }

    /// Stream the session's output as a lazy event sequence.
    ///
    /// Take-once: the first caller owns the pipe. A dedicated task drives
    /// the read so a slow or silent child never stalls other sessions;
    /// when the stream finishes naturally (or fails), the session is
    /// removed from the registry and the child reaped. Dropping the
    /// returned stream cancels forwarding only: the pipe keeps getting
    /// drained so the child can write freely, and the session stays
    /// registered until the process exits or is stopped.
    pub fn stream_session(
        &self,
        id: &str,
    ) -> Result<ReceiverStream<StreamEvent>, AmuxError> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| AmuxError::SessionNotFound(id.to_string()))?;
        let stdout = session
            .take_stdout()
            .ok_or_else(|| AmuxError::StreamAlreadyTaken(id.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let registry = Arc::clone(&self.registry);
        let process = session.process();
        let session_id = session.id.clone();
        let grace = self.config.default_grace;

        tokio::spawn(async move {
            let mut stdout = stdout;
            if stream::pump(&mut stdout, tx).await == PumpOutcome::Cancelled {
                // Cancellation is independent of termination: the pipe
                // stays open (closing it would SIGPIPE a chatty child)
                // and the session stays registered until the process
                // exits on its own or is stopped.
                info!(session_id = %session_id, "stream cancelled by consumer, draining");
                stream::drain(&mut stdout).await;
            }
            finalize(&registry, &session_id, process, grace).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Stop a session: remove it from the registry, then terminate the
    /// process with SIGTERM → grace → SIGKILL escalation.
    ///
    /// Removal happens first so the live count drops immediately and a
    /// second stop observes `SessionNotFound` rather than racing the
    /// termination. An in-progress stream sees EOF once the process dies.
    pub async fn stop_session(
        &self,
        id: &str,
        grace: Option<Duration>,
    ) -> Result<(), AmuxError> {
        let session = self
            .registry
            .remove(id)
            .ok_or_else(|| AmuxError::SessionNotFound(id.to_string()))?;
        let grace = grace.unwrap_or(self.config.default_grace);

        let process = session.process();
        let mut child = process.lock().await;
        let outcome = terminate(&mut child, grace).await?;
        info!(session_id = %id, ?outcome, "session stopped");
        Ok(())
    }

    /// Number of sessions currently active, for health reporting.
    pub fn live_session_count(&self) -> usize {
        self.registry.count()
    }
}

/// Release a session after its stream delivered a terminal event.
///
/// Runs through the same idempotent paths as `stop_session`: if a
/// concurrent stop already removed the entry, only the (no-op) reap
/// remains.
async fn finalize(
    registry: &SessionRegistry,
    session_id: &SessionId,
    process: Arc<Mutex<Child>>,
    grace: Duration,
) {
    if registry.remove(session_id).is_none() {
        // A concurrent stop_session got there first.
        debug!(session_id = %session_id, "session already released");
    }

    let mut child = process.lock().await;
    if let Err(e) = terminate(&mut child, grace).await {
        error!(session_id = %session_id, error = %e, "failed to reap agent process");
    }
}
