//! Sequential step execution with per-step failure policy and rollback.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tb_core::{
    EnvironmentParameters, FailureMode, ReportSection, TestExecutionResult, TestExecutionState,
    TestStep, STEP_SECTION_GROUP,
};
use tracing::{error, info, warn};

use crate::context::StepContext;
use crate::dispatch::DispatchTable;
use crate::steps::{substitute_path, StepProcessor};

/// Receives finalized sections as steps finish and the run's single result.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, section_group: &str, section: ReportSection);
    async fn completed(&self, result: TestExecutionResult);
}

pub struct Sequencer {
    table: DispatchTable,
    context: StepContext,
    sink: Arc<dyn ProgressSink>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Add an entry, tolerating a section a processor already closed.
fn note(section: &mut ReportSection, failure: bool, text: String) {
    let added = if failure {
        section.error(text)
    } else {
        section.warning(text)
    };
    if let Err(e) = added {
        warn!(section = %section.name(), error = %e, "entry dropped");
    }
}

impl Sequencer {
    pub fn new(table: DispatchTable, context: StepContext, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            table,
            context,
            sink,
        }
    }

    pub fn context(&self) -> &StepContext {
        &self.context
    }

    /// Run `steps` in ascending order. Emits exactly one completion.
    pub async fn run(&self, steps: &[TestStep], env: &EnvironmentParameters) -> TestExecutionResult {
        let mut ordered: Vec<&TestStep> = steps.iter().collect();
        ordered.sort_by_key(|s| s.order);

        let mut states = Vec::with_capacity(ordered.len());
        let mut executed: Vec<(Arc<dyn StepProcessor>, &TestStep)> = Vec::new();

        for step in ordered {
            let mut section = ReportSection::new(step.display_name());

            let Some(processor) = self.table.resolve(step.kind()) else {
                error!(step = step.order, kind = %step.kind(), "no processor for step kind");
                note(
                    &mut section,
                    true,
                    format!("no processor is registered for step kind '{}'", step.kind()),
                );
                self.publish(section, false).await;
                states.push(TestExecutionState::Failed);
                if step.failure_mode == FailureMode::Stop {
                    self.rollback(&executed, env).await;
                }
                break;
            };

            info!(step = step.order, kind = %step.kind(), mode = %step.failure_mode, "executing step");
            let state = self.execute_step(processor.as_ref(), step, env, &mut section).await;
            self.transfer_reports(step, env, &mut section).await;
            info!(step = step.order, state = %state, "step finished");
            self.publish(section, state == TestExecutionState::Passed).await;
            states.push(state);

            if state.is_failure() && step.failure_mode == FailureMode::Stop {
                self.rollback(&executed, env).await;
                break;
            }
            if processor.as_cleanup().is_some() {
                executed.push((processor, step));
            }
        }

        let result = TestExecutionResult::fold(states);
        info!(result = %result, "test case finished");
        self.sink.completed(result).await;
        result
    }

    async fn execute_step(
        &self,
        processor: &dyn StepProcessor,
        step: &TestStep,
        env: &EnvironmentParameters,
        section: &mut ReportSection,
    ) -> TestExecutionState {
        if let Err(e) = tokio::fs::create_dir_all(self.context.step_dir(step.order)).await {
            error!(step = step.order, error = %e, "cannot create step directory");
            note(section, true, format!("cannot create step directory: {e}"));
            return TestExecutionState::Crashed;
        }

        let outcome = AssertUnwindSafe(processor.process(step, env, &self.context, section))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                error!(step = step.order, error = ?e, "step processor faulted");
                note(section, true, format!("step faulted: {e} ({e:?})"));
                TestExecutionState::Crashed
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(step = step.order, panic = %message, "step processor panicked");
                note(section, true, format!("step panicked: {message}"));
                TestExecutionState::Crashed
            }
        }
    }

    async fn transfer_reports(&self, step: &TestStep, env: &EnvironmentParameters, section: &mut ReportSection) {
        if !step.has_report_artifacts() {
            return;
        }
        let mut paths: Vec<PathBuf> = step
            .report_files
            .iter()
            .chain(&step.report_directories)
            .map(|p| self.context.resolve(step.order, &substitute_path(p, env)))
            .collect();
        if step.report_includes_system_log {
            match self.context.log_file() {
                Some(log) => paths.push(log.to_path_buf()),
                None => note(section, false, "no worker log to attach".to_string()),
            }
        }
        if paths.is_empty() {
            return;
        }

        let count = paths.len();
        let transfer = self.context.transfer().transfer(step.order, paths);
        match AssertUnwindSafe(transfer).catch_unwind().await {
            Ok(Ok(())) => info!(step = step.order, count, "report artifacts transferred"),
            Ok(Err(e)) => {
                warn!(step = step.order, error = %e, "report transfer failed");
                note(section, false, format!("report transfer failed: {e:#}"));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(step = step.order, panic = %message, "report transfer panicked");
                note(section, false, format!("report transfer failed: {message}"));
            }
        }
    }

    /// Undo executed cleanup-capable steps, newest first. Failures are
    /// logged and never stop the loop.
    async fn rollback(&self, executed: &[(Arc<dyn StepProcessor>, &TestStep)], env: &EnvironmentParameters) {
        if executed.is_empty() {
            return;
        }
        info!(count = executed.len(), "rolling back executed steps");
        for (processor, step) in executed.iter().rev() {
            let Some(cleanup) = processor.as_cleanup() else {
                continue;
            };
            let outcome = AssertUnwindSafe(cleanup.cleanup(step, env, &self.context))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => info!(step = step.order, "step rolled back"),
                Ok(Err(e)) => warn!(step = step.order, error = %e, "rollback failed"),
                Err(payload) => {
                    warn!(step = step.order, panic = %panic_message(payload.as_ref()), "rollback panicked")
                }
            }
        }
    }

    async fn publish(&self, mut section: ReportSection, was_successful: bool) {
        if let Err(e) = section.finalize(was_successful) {
            warn!(section = %section.name(), error = %e, "section already finalized");
        }
        self.sink.progress(STEP_SECTION_GROUP, section).await;
    }
}
