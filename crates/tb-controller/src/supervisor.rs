//! Worker provisioning.
//!
//! A [`WorkerLauncher`] starts a worker and hands back a [`WorkerProcess`]:
//! the worker's endpoint identity plus a way to observe its exit and to
//! kill it. [`ProcessLauncher`] does this with a real child process.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tb_channel::ChannelType;
use tb_core::{EndpointId, WorkerExitCode};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::error::{ControllerError, Result};

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub worker_path: PathBuf,
    /// Endpoint the worker connects back to.
    pub controller: EndpointId,
    pub channel_type: ChannelType,
    pub address: String,
}

impl LaunchRequest {
    pub fn arguments(&self) -> Vec<String> {
        vec![
            "--controller".into(),
            self.controller.to_string(),
            "--channel-type".into(),
            self.channel_type.to_string(),
            "--address".into(),
            self.address.clone(),
        ]
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn exit_code(&self) -> Option<WorkerExitCode> {
        self.code.and_then(WorkerExitCode::from_code)
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "no exit code"),
        }
    }
}

/// Classification of a finished worker, from the orchestrator's viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Exited after reporting its result.
    CompletedNormally,
    /// Exited while the run was still going: a crash or an external kill.
    TerminatedExternally,
    /// Failed to spawn, or exited before signing on.
    NeverStarted,
}

/// Controller's handle on a launched worker.
pub struct WorkerProcess {
    endpoint: EndpointId,
    exit: watch::Receiver<Option<WorkerExit>>,
    kill: Option<oneshot::Sender<()>>,
}

/// Launcher's side of a [`WorkerProcess`]: reports the exit and receives
/// the kill request.
pub struct WorkerControl {
    exit: watch::Sender<Option<WorkerExit>>,
    kill: oneshot::Receiver<()>,
}

impl WorkerProcess {
    pub fn channel(endpoint: EndpointId) -> (Self, WorkerControl) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        (
            Self {
                endpoint,
                exit: exit_rx,
                kill: Some(kill_tx),
            },
            WorkerControl {
                exit: exit_tx,
                kill: kill_rx,
            },
        )
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn exit(&self) -> Option<WorkerExit> {
        *self.exit.borrow()
    }

    /// Resolves once the worker has exited. Cancel safe.
    pub async fn wait(&mut self) -> WorkerExit {
        match self.exit.wait_for(Option::is_some).await {
            Ok(exit) => exit.unwrap_or(WorkerExit { code: None }),
            // Observer gone without reporting: nothing left to wait for.
            Err(_) => WorkerExit { code: None },
        }
    }

    /// Ask the launcher to kill the worker. Only the first call has effect.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

impl WorkerControl {
    pub fn report_exit(&self, exit: WorkerExit) {
        self.exit.send_replace(Some(exit));
    }

    /// Resolves when the controller asks for a kill. Never resolves if the
    /// [`WorkerProcess`] was dropped without asking.
    pub async fn kill_requested(&mut self) {
        if (&mut self.kill).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<WorkerProcess>;
}

/// Starts the worker executable as a child process. Its stdio is not
/// captured; the worker keeps its own log file.
pub struct ProcessLauncher;

impl ProcessLauncher {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<WorkerProcess> {
        let spawn_error = |source| ControllerError::Spawn {
            path: request.worker_path.clone(),
            source,
        };
        let child = Command::new(&request.worker_path)
            .args(request.arguments())
            .stdin(Stdio::null())
            .spawn()
            .map_err(spawn_error)?;
        let pid = child.id().ok_or_else(|| {
            spawn_error(std::io::Error::other("worker exited before its pid was read"))
        })?;

        let endpoint = EndpointId::for_worker(pid);
        info!(pid, endpoint = %endpoint, path = %request.worker_path.display(), "worker started");
        let (process, control) = WorkerProcess::channel(endpoint);
        tokio::spawn(observe(child, pid, control));
        Ok(process)
    }
}

async fn observe(mut child: Child, pid: u32, mut control: WorkerControl) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = control.kill_requested() => {
            warn!(pid, "killing worker");
            if let Err(e) = child.start_kill() {
                warn!(pid, error = %e, "kill failed");
            }
            child.wait().await
        }
    };
    let exit = match status {
        Ok(status) => WorkerExit {
            code: status.code(),
        },
        Err(e) => {
            warn!(pid, error = %e, "failed to wait for worker");
            WorkerExit { code: None }
        }
    };
    info!(pid, exit = %exit, "worker exited");
    control.report_exit(exit);
}
