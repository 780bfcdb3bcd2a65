use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

/// Moves a step's report artifacts back to the controller.
#[async_trait]
pub trait ReportTransfer: Send + Sync {
    async fn transfer(&self, step_order: u32, paths: Vec<PathBuf>) -> anyhow::Result<()>;
}

/// Drops report artifacts. Used when nobody collects them.
pub struct NoReportTransfer;

#[async_trait]
impl ReportTransfer for NoReportTransfer {
    async fn transfer(&self, step_order: u32, paths: Vec<PathBuf>) -> anyhow::Result<()> {
        tracing::debug!(step = step_order, count = paths.len(), "report artifacts discarded");
        Ok(())
    }
}

/// Where a run keeps its files and how it ships reports.
#[derive(Clone)]
pub struct StepContext {
    scratch_root: PathBuf,
    log_file: Option<PathBuf>,
    transfer: Arc<dyn ReportTransfer>,
}

impl StepContext {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            log_file: None,
            transfer: Arc::new(NoReportTransfer),
        }
    }

    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn ReportTransfer>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn transfer(&self) -> &Arc<dyn ReportTransfer> {
        &self.transfer
    }

    /// Input directory of step `order`, also the working directory of the
    /// processes it launches.
    pub fn step_dir(&self, order: u32) -> PathBuf {
        self.scratch_root.join(order.to_string())
    }

    /// Resolve a step-relative path against the step directory.
    pub fn resolve(&self, order: u32, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.step_dir(order).join(path)
        }
    }
}
