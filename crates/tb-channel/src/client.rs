//! Typed wrappers over [`ChannelHost::call`] for the two remotely callable
//! surfaces: the controller's commands and the worker's `Terminate`.

use std::sync::Arc;

use tb_core::{EndpointId, EnvironmentParameters, TestExecutionState, TestStep, UploadToken};

use crate::error::{ChannelError, Result};
use crate::host::ChannelHost;
use crate::protocol::{Command, Reply};

fn unexpected(command: &Command, reply: Reply) -> ChannelError {
    ChannelError::UnexpectedReply {
        command: command.name(),
        reply: reply.name(),
    }
}

/// Commands exposed by a controller.
#[derive(Clone)]
pub struct ControllerClient {
    host: Arc<ChannelHost>,
    controller: EndpointId,
}

impl ControllerClient {
    pub fn new(host: Arc<ChannelHost>, controller: EndpointId) -> Self {
        Self { host, controller }
    }

    pub fn controller(&self) -> &EndpointId {
        &self.controller
    }

    pub fn host(&self) -> &Arc<ChannelHost> {
        &self.host
    }

    async fn ack(&self, command: Command) -> Result<()> {
        let reply = self.host.call(&self.controller, command.clone()).await?;
        match reply {
            Reply::Ack => Ok(()),
            other => Err(unexpected(&command, other)),
        }
    }

    /// Start a run. `upload_token` names the test-files archive the caller
    /// registered with its own broker.
    pub async fn execute(
        &self,
        steps: Vec<TestStep>,
        environment: EnvironmentParameters,
        upload_token: UploadToken,
    ) -> Result<()> {
        self.ack(Command::Execute {
            steps,
            environment,
            calling_endpoint: self.host.endpoint().clone(),
            upload_token,
        })
        .await
    }

    pub async fn state(&self) -> Result<TestExecutionState> {
        match self.host.call(&self.controller, Command::State).await? {
            Reply::State(state) => Ok(state),
            other => Err(unexpected(&Command::State, other)),
        }
    }

    pub async fn terminate(&self) -> Result<()> {
        self.ack(Command::Terminate).await
    }

    pub async fn test_case(&self) -> Result<Vec<TestStep>> {
        match self.host.call(&self.controller, Command::TestCase).await? {
            Reply::TestCase(steps) => Ok(steps),
            other => Err(unexpected(&Command::TestCase, other)),
        }
    }

    pub async fn environment_parameters(&self) -> Result<EnvironmentParameters> {
        match self
            .host
            .call(&self.controller, Command::EnvironmentParameters)
            .await?
        {
            Reply::EnvironmentParameters(environment) => Ok(environment),
            other => Err(unexpected(&Command::EnvironmentParameters, other)),
        }
    }

    pub async fn prepare_test_files_for_transfer(&self) -> Result<UploadToken> {
        match self
            .host
            .call(&self.controller, Command::PrepareTestFilesForTransfer)
            .await?
        {
            Reply::Token(token) => Ok(token),
            other => Err(unexpected(&Command::PrepareTestFilesForTransfer, other)),
        }
    }

    /// Ask the controller to pull report files that `calling_endpoint`
    /// registered under `upload_token` for step `step_order`.
    pub async fn prepare_report_files_for_transfer(
        &self,
        step_order: u32,
        upload_token: UploadToken,
    ) -> Result<()> {
        self.ack(Command::PrepareReportFilesForTransfer {
            step_order,
            calling_endpoint: self.host.endpoint().clone(),
            upload_token,
        })
        .await
    }
}

/// The worker's only command.
#[derive(Clone)]
pub struct WorkerClient {
    host: Arc<ChannelHost>,
    worker: EndpointId,
}

impl WorkerClient {
    pub fn new(host: Arc<ChannelHost>, worker: EndpointId) -> Self {
        Self { host, worker }
    }

    pub fn worker(&self) -> &EndpointId {
        &self.worker
    }

    pub async fn terminate(&self) -> Result<()> {
        match self.host.call(&self.worker, Command::Terminate).await? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(&Command::Terminate, other)),
        }
    }
}
