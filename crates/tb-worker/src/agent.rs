//! The worker's lifecycle: connect, sign on, pull the assignment, run it,
//! and stop early when the controller says so.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tb_channel::{
    connect, download, Capability, ChannelHost, Command, CommandHandler, ControllerClient, Reply,
};
use tb_core::{EndpointId, TestExecutionResult, WorkerExitCode};
use tb_runner::executor::ProcessExecutor;
use tb_runner::{DispatchTable, Sequencer, StepContext, ToolConfig};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::args::WorkerArgs;
use crate::transfer::{ChannelReportTransfer, NotificationSink};

/// Upper bound for flushing queued frames before the process exits.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    Finished(TestExecutionResult),
    Terminated,
}

impl AgentOutcome {
    pub fn exit_code(self) -> WorkerExitCode {
        match self {
            Self::Finished(result) => WorkerExitCode::for_result(result),
            Self::Terminated => WorkerExitCode::Terminated,
        }
    }
}

/// Serves the worker's only command.
struct TerminateHandler {
    stop: Arc<Notify>,
}

#[async_trait]
impl CommandHandler for TerminateHandler {
    async fn handle(&self, caller: &EndpointId, command: Command) -> anyhow::Result<Reply> {
        match command {
            Command::Terminate => {
                info!(caller = %caller, "terminate requested");
                // Stored as a permit if the main loop is not waiting yet.
                self.stop.notify_one();
                Ok(Reply::Ack)
            }
            other => anyhow::bail!("worker does not serve {}", other.name()),
        }
    }
}

/// Connect to the controller named in `args` as `endpoint` and run the
/// assignment inside `scratch`.
pub async fn run_agent(
    args: &WorkerArgs,
    endpoint: EndpointId,
    scratch: &Path,
    log_file: Option<PathBuf>,
) -> Result<AgentOutcome> {
    let host = ChannelHost::new(endpoint);
    let stop = Arc::new(Notify::new());
    host.install_handler(Arc::new(TerminateHandler { stop: stop.clone() }));

    let peer = connect(&host, args.channel_type, &args.address)
        .await
        .with_context(|| format!("failed to reach controller at {}", args.address))?;
    if peer != args.controller {
        warn!(expected = %args.controller, connected = %peer, "controller announced a different identity");
    }
    host.sign_in(Capability::Commands).await;
    host.sign_in(Capability::Notifications).await;

    let client = ControllerClient::new(host.clone(), peer.clone());
    let outcome = tokio::select! {
        result = execute_assignment(&host, &client, scratch, log_file) => AgentOutcome::Finished(result?),
        _ = stop.notified() => {
            info!("stopping on controller request");
            AgentOutcome::Terminated
        }
    };

    host.shutdown(FLUSH_TIMEOUT).await;
    Ok(outcome)
}

async fn execute_assignment(
    host: &Arc<ChannelHost>,
    client: &ControllerClient,
    scratch: &Path,
    log_file: Option<PathBuf>,
) -> Result<TestExecutionResult> {
    let steps = client.test_case().await.context("failed to fetch the test case")?;
    let environment = client
        .environment_parameters()
        .await
        .context("failed to fetch environment parameters")?;
    let token = client
        .prepare_test_files_for_transfer()
        .await
        .context("controller did not offer test files")?;

    let archive = scratch.join("test-files.zip");
    download(host, client.controller(), token, &archive)
        .await
        .context("failed to download test files")?;
    let root = scratch.to_path_buf();
    let files = tokio::task::spawn_blocking(move || tb_core::archive::unpack(&archive, &root))
        .await
        .context("unpack task failed")?
        .context("failed to unpack test files")?;
    info!(steps = steps.len(), files, scratch = %scratch.display(), "assignment received");

    let mut context = StepContext::new(scratch).with_transfer(Arc::new(ChannelReportTransfer::new(
        client.clone(),
        scratch,
    )));
    if let Some(log_file) = log_file {
        context = context.with_log_file(log_file);
    }
    let table = DispatchTable::with_defaults(Arc::new(ProcessExecutor::new()), ToolConfig::default());
    let sink = Arc::new(NotificationSink::new(host.clone(), client.controller().clone()));

    Ok(Sequencer::new(table, context, sink).run(&steps, &environment).await)
}
