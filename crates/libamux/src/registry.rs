use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use dashmap::DashMap;
use tokio::process::{Child, ChildStdout};
use tokio::sync::Mutex;
use tracing::info;

use amux_protocol::SessionId;

use crate::error::AmuxError;

/// One supervised agent run: the registry entry from spawn to reap.
///
/// The process handle is shared between at most two owners — the stream
/// reader and a potential terminator — through the inner mutex. The
/// stdout pipe is a take-once slot: exactly one stream may drain it.
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub pid: u32,
    pub created_at: SystemTime,
    process: Arc<Mutex<Child>>,
    stdout: Arc<StdMutex<Option<ChildStdout>>>,
}

impl Session {
    /// Shared handle to the child process.
    pub fn process(&self) -> Arc<Mutex<Child>> {
        Arc::clone(&self.process)
    }

    /// Take the stdout pipe. Returns `None` on the second and later calls.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.stdout.lock().ok()?.take()
    }
}

/// Concurrency-safe table mapping session id to an active process.
///
/// Backed by `DashMap` so create/remove on different ids never contend
/// on a global lock; lookups only ever observe fully-constructed entries.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a freshly spawned child under a new unique id.
    ///
    /// The stdout pipe is moved out of the child into the take-once slot
    /// before the entry becomes visible.
    pub fn register(&self, mut child: Child) -> Result<Session, AmuxError> {
        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id().ok_or_else(|| {
            AmuxError::LaunchFailure(std::io::Error::other("process exited before registration"))
        })?;
        let stdout = child.stdout.take();

        let session = Session {
            id: id.clone(),
            pid,
            created_at: SystemTime::now(),
            process: Arc::new(Mutex::new(child)),
            stdout: Arc::new(StdMutex::new(stdout)),
        };

        self.sessions.insert(id.clone(), session.clone());
        info!(session_id = %id, pid, "session registered");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a session. Idempotent: removing an unknown id returns `None`.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            info!(session_id = %id, "session removed");
        }
        removed
    }

    /// Number of sessions currently considered active.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use crate::supervisor::spawn_agent;
    use std::collections::HashMap;

    fn spawn_sleep() -> Child {
        let spec = CommandSpec {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
        };
        spawn_agent(&spec, HashMap::new(), None).unwrap()
    }

    #[tokio::test]
    async fn register_get_remove_cycle() {
        let registry = SessionRegistry::new();
        let session = registry.register(spawn_sleep()).unwrap();

        assert_eq!(registry.count(), 1);
        let looked_up = registry.get(&session.id).unwrap();
        assert_eq!(looked_up.pid, session.pid);

        assert!(registry.remove(&session.id).is_some());
        assert_eq!(registry.count(), 0);
        assert!(registry.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = registry.register(spawn_sleep()).unwrap();
        assert!(registry.remove(&session.id).is_some());
        assert!(registry.remove(&session.id).is_none());
        assert!(registry.remove("never-existed").is_none());
    }

    #[tokio::test]
    async fn ids_are_unique_per_registration() {
        let registry = SessionRegistry::new();
        let a = registry.register(spawn_sleep()).unwrap();
        let b = registry.register(spawn_sleep()).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.pid, b.pid);
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn stdout_is_take_once() {
        let registry = SessionRegistry::new();
        let session = registry.register(spawn_sleep()).unwrap();
        assert!(session.take_stdout().is_some());
        assert!(session.take_stdout().is_none());

        // The clone held by the registry shares the same slot.
        let looked_up = registry.get(&session.id).unwrap();
        assert!(looked_up.take_stdout().is_none());
    }
}
