//! Starts agent processes on the host.

use std::{collections::HashMap, path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use tokio::{
    process::Command,
    sync::{Mutex, oneshot},
};

/// Launch error.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Agent already running for this session")]
    AlreadyRunning,
    #[error("Failed to start agent: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Agent process has no pid")]
    NoPid,
}

/// A started agent process.
#[derive(Debug)]
pub struct LaunchedAgent {
    /// OS process id.
    pub pid: u32,
    /// Resolves (or errors) once the process has exited.
    pub exited: oneshot::Receiver<()>,
}

/// Trait for starting an agent bridge for a session.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start an agent that will register `session_id` with the hub.
    async fn launch(&self, session_id: &str) -> Result<LaunchedAgent, LaunchError>;
}

/// Launches the `relay-agent` executable as a detached child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    hub_url: String,
}

impl ProcessLauncher {
    /// Create a launcher for `program`, pointing agents at `hub_url`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, hub_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            hub_url: hub_url.into(),
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, session_id: &str) -> Result<LaunchedAgent, LaunchError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(session_id)
            .arg("--hub-url")
            .arg(&self.hub_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or(LaunchError::NoPid)?;
        tracing::info!(session_id, pid, program = %self.program.display(), "Agent launched");

        let (done, exited) = oneshot::channel();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(session_id = %session_id, pid, %status, "Agent exited"),
                Err(e) => tracing::warn!(session_id = %session_id, pid, "Failed to wait for agent: {e}"),
            }
            let _ = done.send(());
        });

        Ok(LaunchedAgent { pid, exited })
    }
}

/// Tracks launched agents so a session gets at most one at a time.
pub struct AgentSupervisor {
    launcher: Arc<dyn Launcher>,
    running: Arc<Mutex<HashMap<String, u32>>>,
}

impl AgentSupervisor {
    /// Create a supervisor around `launcher`.
    #[must_use]
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Launch an agent for `session_id` unless one is still alive.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if a launched agent for the session has not
    /// exited yet, or the launcher's error.
    pub async fn start(&self, session_id: &str) -> Result<u32, LaunchError> {
        let mut running = self.running.lock().await;
        if running.contains_key(session_id) {
            return Err(LaunchError::AlreadyRunning);
        }

        let LaunchedAgent { pid, exited } = self.launcher.launch(session_id).await?;
        running.insert(session_id.to_string(), pid);
        drop(running);

        let table = Arc::clone(&self.running);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let _ = exited.await;
            let mut running = table.lock().await;
            if running.get(&session_id) == Some(&pid) {
                running.remove(&session_id);
            }
        });

        Ok(pid)
    }

    /// Pid of the live launched agent for `session_id`.
    pub async fn pid(&self, session_id: &str) -> Option<u32> {
        self.running.lock().await.get(session_id).copied()
    }
}
