//! Channel-backed implementations of the runner's reporting seams.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tb_channel::{ChannelHost, ControllerClient, Notification};
use tb_core::{EndpointId, ReportSection, TestExecutionResult};
use tb_runner::{ProgressSink, ReportTransfer};
use tracing::{debug, warn};

/// Raises progress and completion as notifications towards the controller.
pub struct NotificationSink {
    host: Arc<ChannelHost>,
    controller: EndpointId,
}

impl NotificationSink {
    pub fn new(host: Arc<ChannelHost>, controller: EndpointId) -> Self {
        Self { host, controller }
    }
}

#[async_trait]
impl ProgressSink for NotificationSink {
    async fn progress(&self, section_group: &str, section: ReportSection) {
        debug!(section = %section.name(), "raising progress");
        let notification = Notification::ExecutionProgress {
            section_group: section_group.to_string(),
            section,
        };
        if let Err(e) = self.host.notify(&self.controller, notification).await {
            warn!(error = %e, "progress notification lost");
        }
    }

    async fn completed(&self, result: TestExecutionResult) {
        let notification = Notification::TestCompletion { result };
        if let Err(e) = self.host.notify(&self.controller, notification).await {
            warn!(error = %e, "completion notification lost");
        }
    }
}

/// Zips a step's report artifacts, offers the archive through the broker
/// and asks the controller to pull it.
pub struct ChannelReportTransfer {
    client: ControllerClient,
    scratch: PathBuf,
}

impl ChannelReportTransfer {
    pub fn new(client: ControllerClient, scratch: impl Into<PathBuf>) -> Self {
        Self {
            client,
            scratch: scratch.into(),
        }
    }
}

#[async_trait]
impl ReportTransfer for ChannelReportTransfer {
    async fn transfer(&self, step_order: u32, paths: Vec<PathBuf>) -> anyhow::Result<()> {
        let archive = self.scratch.join(format!("report-{step_order}.zip"));
        let target = archive.clone();
        let files = tokio::task::spawn_blocking(move || tb_core::archive::pack_paths(&paths, &target))
            .await
            .context("report packing task failed")?
            .context("failed to pack report files")?;

        let broker = self.client.host().broker();
        let token = broker.register(&archive);
        let result = self
            .client
            .prepare_report_files_for_transfer(step_order, token)
            .await
            .context("controller did not take the report files");
        broker.revoke(&token);
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!(error = %e, "report archive not removed");
        }
        result?;
        debug!(step = step_order, files, "report files handed over");
        Ok(())
    }
}
