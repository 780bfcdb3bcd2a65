//! The controller's command surface and the orchestration of one run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tb_channel::{
    download, ChannelHost, Command, CommandHandler, IncomingNotification, Notification, Reply,
    WorkerClient,
};
use tb_core::plan::validate_steps;
use tb_core::{
    EndpointId, EnvironmentParameters, ReportSection, TestExecutionResult, TestExecutionState,
    TestReport, TestStep, UploadToken, CONTROLLER_SECTION_GROUP,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::handshake::await_sign_on;
use crate::session::ActiveSession;
use crate::supervisor::{LaunchRequest, WorkerExit, WorkerLauncher, WorkerOutcome, WorkerProcess};

const EVENT_CAPACITY: usize = 1024;
/// How long to keep reading a dead worker's last notifications.
const EXIT_DRAIN: Duration = Duration::from_millis(500);
/// How long a killed worker gets to go away.
const KILL_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ControllerService {
    host: Arc<ChannelHost>,
    session: Arc<ActiveSession>,
    launcher: Arc<dyn WorkerLauncher>,
    config: Arc<ControllerConfig>,
    /// Address the launched worker dials back to.
    worker_address: Arc<str>,
    events: broadcast::Sender<Notification>,
}

impl ControllerService {
    pub fn new(
        host: Arc<ChannelHost>,
        launcher: Arc<dyn WorkerLauncher>,
        config: ControllerConfig,
        worker_address: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let worker_address: String = worker_address.into();
        Self {
            host,
            session: Arc::new(ActiveSession::new()),
            launcher,
            config: Arc::new(config),
            worker_address: Arc::from(worker_address),
            events,
        }
    }

    pub fn session(&self) -> &Arc<ActiveSession> {
        &self.session
    }

    /// Progress and results of every run, as relayed to callers.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    // ── Controller-facing ──

    /// Record the run and return; provisioning and relaying continue in the
    /// background. Failures after this point surface as a Failed result.
    pub fn execute(
        &self,
        steps: Vec<TestStep>,
        environment: EnvironmentParameters,
        calling_endpoint: EndpointId,
        upload_token: UploadToken,
    ) -> Result<()> {
        validate_steps(&steps).map_err(|e| ControllerError::InvalidPlan(format!("{e:#}")))?;
        self.session
            .begin(steps, environment, calling_endpoint.clone())?;

        info!(caller = %calling_endpoint, token = %upload_token, "execute accepted");
        let service = self.clone();
        tokio::spawn(async move { service.orchestrate(calling_endpoint, upload_token).await });
        Ok(())
    }

    pub fn state(&self) -> TestExecutionState {
        self.session.state()
    }

    /// Ask the associated worker to stop. Best effort: failures are logged.
    pub async fn terminate(&self) {
        let Some(worker) = self.session.worker() else {
            debug!("terminate requested without a worker");
            return;
        };
        info!(worker = %worker, "terminating worker");
        if let Err(e) = WorkerClient::new(self.host.clone(), worker.clone()).terminate().await {
            warn!(worker = %worker, error = %e, "worker terminate failed");
        }
    }

    pub fn report(&self) -> TestReport {
        self.session.report()
    }

    // ── Worker-facing ──

    pub fn test_case(&self) -> Vec<TestStep> {
        self.session.steps()
    }

    pub fn environment_parameters(&self) -> EnvironmentParameters {
        self.session.environment()
    }

    pub fn prepare_test_files_for_transfer(&self) -> Result<UploadToken> {
        let asset = self.session.asset().ok_or(ControllerError::NoTestFiles)?;
        let token = self.host.broker().register(asset);
        self.session.record_offer(token);
        Ok(token)
    }

    /// Pull a step's report archive from `source` and unpack it under
    /// `<report_dir>/step-<order>/`.
    pub async fn prepare_report_files_for_transfer(
        &self,
        step_order: u32,
        source: &EndpointId,
        upload_token: UploadToken,
    ) -> Result<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix("testbench-report-")
            .tempdir_in(&self.config.scratch_root)?;
        let archive = scratch.path().join("report.zip");
        download(&self.host, source, upload_token, &archive)
            .await
            .map_err(ControllerError::Download)?;

        let destination = report_destination(&self.config.report_dir, step_order);
        let target = destination.clone();
        let files = tokio::task::spawn_blocking(move || {
            let files = tb_core::archive::unpack(&archive, &target);
            drop(scratch);
            files
        })
        .await
        .map_err(|e| ControllerError::Io(std::io::Error::other(e)))?
        .map_err(|e| ControllerError::Io(std::io::Error::other(e)))?;
        info!(step = step_order, files, destination = %destination.display(), "report files received");
        Ok(destination)
    }

    // ── Orchestration ──

    async fn orchestrate(self, caller: EndpointId, token: UploadToken) {
        // Subscribe before the worker exists so none of its notifications
        // can slip past.
        let mut notifications = self.host.subscribe_notifications();

        if let Err(e) = self.fetch_test_files(&caller, token).await {
            error!(error = %e, "provisioning failed");
            self.fail_run("Provisioning", format!("could not fetch test files: {e}"))
                .await;
            return;
        }

        let request = LaunchRequest {
            worker_path: self.config.worker_path.clone(),
            controller: self.host.endpoint().clone(),
            channel_type: self.config.channel_type,
            address: self.worker_address.to_string(),
        };
        let mut worker = match self.launcher.launch(request).await {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = %e, "worker launch failed");
                self.fail_run("Provisioning", format!("could not start the worker: {e}"))
                    .await;
                return;
            }
        };
        let endpoint = worker.endpoint().clone();
        self.session.attach_worker(endpoint.clone());

        let timeout = self.config.handshake_timeout();
        let signed_on = tokio::select! {
            signed_on = await_sign_on(&self.host, &endpoint, timeout) => signed_on,
            exit = worker.wait() => {
                self.finish(WorkerOutcome::NeverStarted, exit).await;
                return;
            }
        };
        if let Err(e) = signed_on {
            worker.kill();
            let exit = match tokio::time::timeout(KILL_GRACE, worker.wait()).await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!(worker = %endpoint, "killed worker did not exit");
                    WorkerExit { code: None }
                }
            };
            self.fail_run("Worker sign-on", format!("{e}; worker {exit}"))
                .await;
            return;
        }

        let (outcome, exit) = self.relay(&mut worker, &mut notifications).await;
        self.finish(outcome, exit).await;
    }

    async fn fetch_test_files(&self, caller: &EndpointId, token: UploadToken) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix("testbench-")
            .tempdir_in(&self.config.scratch_root)?;
        let asset = scratch.path().join("test-files.zip");
        let bytes = download(&self.host, caller, token, &asset)
            .await
            .map_err(ControllerError::Download)?;
        info!(bytes, asset = %asset.display(), "test files downloaded");
        self.session.set_asset(asset, scratch);
        Ok(())
    }

    /// Forward the worker's notifications until it exits.
    async fn relay(
        &self,
        worker: &mut WorkerProcess,
        notifications: &mut broadcast::Receiver<IncomingNotification>,
    ) -> (WorkerOutcome, WorkerExit) {
        let endpoint = worker.endpoint().clone();
        let exit = loop {
            tokio::select! {
                incoming = notifications.recv() => match incoming {
                    Ok(incoming) if incoming.from == endpoint => {
                        self.forward(incoming.notification).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "notification relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break worker.wait().await,
                },
                exit = worker.wait() => break exit,
            }
        };

        // The exit can overtake frames still queued on the connection.
        while self.session.result().is_none() {
            match tokio::time::timeout(EXIT_DRAIN, notifications.recv()).await {
                Ok(Ok(incoming)) if incoming.from == endpoint => {
                    self.forward(incoming.notification).await;
                }
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }

        let outcome = if self.session.result().is_some() {
            WorkerOutcome::CompletedNormally
        } else {
            WorkerOutcome::TerminatedExternally
        };
        (outcome, exit)
    }

    async fn forward(&self, notification: Notification) {
        match notification {
            Notification::ExecutionProgress {
                section_group,
                section,
            } => {
                if self.session.result().is_some() {
                    debug!(section = %section.name(), "dropping progress after the result");
                    return;
                }
                self.publish_section(&section_group, section).await;
            }
            Notification::TestCompletion { result } => self.publish_result(result).await,
        }
    }

    async fn finish(&self, outcome: WorkerOutcome, exit: WorkerExit) {
        match outcome {
            WorkerOutcome::CompletedNormally => {
                info!(exit = %exit, "worker finished");
            }
            WorkerOutcome::TerminatedExternally => {
                warn!(exit = %exit, "worker ended without reporting a result");
                self.fail_run("Worker", format!("worker process ended unexpectedly ({exit})"))
                    .await;
                return;
            }
            WorkerOutcome::NeverStarted => {
                warn!(exit = %exit, "worker exited before signing on");
                self.fail_run("Worker sign-on", format!("worker exited before signing on ({exit})"))
                    .await;
                return;
            }
        }
        self.return_to_idle();
    }

    /// Report a controller-side failure as a finalized section plus a Failed
    /// result, then return to idle.
    async fn fail_run(&self, section_name: &str, message: String) {
        let mut section = ReportSection::new(section_name);
        if let Err(e) = section.error(message) {
            warn!(error = %e, "failure entry dropped");
        }
        if let Err(e) = section.finalize(false) {
            warn!(error = %e, "failure section already finalized");
        }
        self.publish_section(CONTROLLER_SECTION_GROUP, section).await;
        self.publish_result(TestExecutionResult::Failed).await;
        self.return_to_idle();
    }

    fn return_to_idle(&self) {
        for token in self.session.reset_to_idle() {
            self.host.broker().revoke(&token);
        }
    }

    async fn publish_section(&self, group: &str, section: ReportSection) {
        self.session.record_section(group, section.clone());
        self.emit(Notification::ExecutionProgress {
            section_group: group.to_string(),
            section,
        })
        .await;
    }

    async fn publish_result(&self, result: TestExecutionResult) {
        if !self.session.record_result(result) {
            warn!(result = %result, "ignoring a second result for the run");
            return;
        }
        info!(result = %result, "run finished");
        self.emit(Notification::TestCompletion { result }).await;
    }

    async fn emit(&self, notification: Notification) {
        let _ = self.events.send(notification.clone());
        let Some(caller) = self.session.caller() else {
            return;
        };
        if let Err(e) = self.host.notify(&caller, notification).await {
            debug!(caller = %caller, error = %e, "caller not reachable");
        }
    }
}

#[async_trait]
impl CommandHandler for ControllerService {
    async fn handle(&self, caller: &EndpointId, command: Command) -> anyhow::Result<Reply> {
        debug!(caller = %caller, command = command.name(), "controller command");
        let reply = match command {
            Command::Execute {
                steps,
                environment,
                calling_endpoint,
                upload_token,
            } => {
                self.execute(steps, environment, calling_endpoint, upload_token)?;
                Reply::Ack
            }
            Command::State => Reply::State(self.state()),
            Command::Terminate => {
                self.terminate().await;
                Reply::Ack
            }
            Command::TestCase => Reply::TestCase(self.test_case()),
            Command::EnvironmentParameters => Reply::EnvironmentParameters(self.environment_parameters()),
            Command::PrepareTestFilesForTransfer => Reply::Token(self.prepare_test_files_for_transfer()?),
            Command::PrepareReportFilesForTransfer {
                step_order,
                calling_endpoint,
                upload_token,
            } => {
                self.prepare_report_files_for_transfer(step_order, &calling_endpoint, upload_token)
                    .await?;
                Reply::Ack
            }
            Command::Download { .. } => anyhow::bail!("downloads are served by the broker"),
        };
        Ok(reply)
    }
}

/// Where a step's unpacked report files end up.
pub fn report_destination(report_dir: &Path, step_order: u32) -> PathBuf {
    report_dir.join(format!("step-{step_order}"))
}
