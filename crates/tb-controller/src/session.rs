//! The controller's single active session.
//!
//! Only the orchestration task spawned by `execute` moves the state along;
//! everything else reads under a short lock.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tb_core::{
    EndpointId, EnvironmentParameters, ReportSection, TestExecutionResult, TestExecutionState,
    TestReport, TestStep, UploadToken,
};
use tempfile::TempDir;
use tracing::info;

use crate::error::{ControllerError, Result};

#[derive(Default)]
struct SessionRecord {
    steps: Vec<TestStep>,
    environment: EnvironmentParameters,
    asset: Option<PathBuf>,
    scratch: Option<TempDir>,
    /// Broker tokens handed out for `asset`.
    offered: Vec<UploadToken>,
    state: TestExecutionState,
    result: Option<TestExecutionResult>,
    worker: Option<EndpointId>,
    caller: Option<EndpointId>,
    report: TestReport,
}

#[derive(Default)]
pub struct ActiveSession {
    inner: RwLock<SessionRecord>,
}

impl ActiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionRecord> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionRecord> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the session for a new run. Fails while another run is active.
    pub fn begin(
        &self,
        steps: Vec<TestStep>,
        environment: EnvironmentParameters,
        caller: EndpointId,
    ) -> Result<()> {
        let mut record = self.write();
        if !record.state.is_idle() {
            return Err(ControllerError::SessionBusy(record.state));
        }
        *record = SessionRecord {
            steps,
            environment,
            state: TestExecutionState::Running,
            caller: Some(caller),
            ..SessionRecord::default()
        };
        info!(steps = record.steps.len(), "session started");
        Ok(())
    }

    pub fn state(&self) -> TestExecutionState {
        self.read().state
    }

    pub fn is_active(&self) -> bool {
        !self.read().state.is_idle()
    }

    pub fn steps(&self) -> Vec<TestStep> {
        self.read().steps.clone()
    }

    pub fn environment(&self) -> EnvironmentParameters {
        self.read().environment.clone()
    }

    pub fn asset(&self) -> Option<PathBuf> {
        self.read().asset.clone()
    }

    pub fn worker(&self) -> Option<EndpointId> {
        self.read().worker.clone()
    }

    pub fn caller(&self) -> Option<EndpointId> {
        self.read().caller.clone()
    }

    pub fn result(&self) -> Option<TestExecutionResult> {
        self.read().result
    }

    pub fn report(&self) -> TestReport {
        self.read().report.clone()
    }

    /// Keep the downloaded asset. `scratch` is removed when the session
    /// returns to idle.
    pub fn set_asset(&self, asset: PathBuf, scratch: TempDir) {
        let mut record = self.write();
        record.asset = Some(asset);
        record.scratch = Some(scratch);
    }

    /// Remember a token registered for the asset so it can be revoked.
    pub fn record_offer(&self, token: UploadToken) {
        self.write().offered.push(token);
    }

    pub fn attach_worker(&self, worker: EndpointId) {
        self.write().worker = Some(worker);
    }

    pub fn record_section(&self, group: &str, section: ReportSection) {
        self.write().report.push(group, section);
    }

    /// Record the run's result. Returns `false` if one was already recorded.
    pub fn record_result(&self, result: TestExecutionResult) -> bool {
        let mut record = self.write();
        if record.result.is_some() {
            return false;
        }
        record.result = Some(result);
        record.state = result.into();
        true
    }

    /// Forget the worker and the scratch files; the report stays readable.
    /// Returns the asset tokens still registered with the broker.
    #[must_use]
    pub fn reset_to_idle(&self) -> Vec<UploadToken> {
        let (scratch, offered) = {
            let mut record = self.write();
            record.state = TestExecutionState::None;
            record.worker = None;
            record.caller = None;
            record.asset = None;
            (record.scratch.take(), std::mem::take(&mut record.offered))
        };
        if let Some(dir) = scratch {
            if let Err(e) = dir.close() {
                tracing::warn!(error = %e, "failed to remove session scratch directory");
            }
        }
        info!("session idle");
        offered
    }
}
