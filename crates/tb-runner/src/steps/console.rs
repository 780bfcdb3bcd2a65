use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tb_core::{EnvironmentParameters, ReportSection, StepDetails, StepKind, TestExecutionState, TestStep};
use tracing::info;

use super::{ensure_kind, long_arguments, record_output, substitute_path, StepProcessor};
use crate::context::StepContext;
use crate::error::{Result, StepError};
use crate::executor::{Executor, Invocation, DEFAULT_TIMEOUT};

/// Runs an executable with the step parameters as `--key=value` arguments.
pub struct ConsoleProcessor {
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl ConsoleProcessor {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A relative executable shipped with the step wins over one on `PATH`.
fn resolve_program(ctx: &StepContext, order: u32, executable: &Path) -> PathBuf {
    if executable.is_relative() {
        let shipped = ctx.step_dir(order).join(executable);
        if shipped.exists() {
            return shipped;
        }
    }
    executable.to_path_buf()
}

#[async_trait]
impl StepProcessor for ConsoleProcessor {
    fn kind(&self) -> StepKind {
        StepKind::Console
    }

    async fn process(
        &self,
        step: &TestStep,
        env: &EnvironmentParameters,
        ctx: &StepContext,
        section: &mut ReportSection,
    ) -> Result<TestExecutionState> {
        ensure_kind(self.kind(), step)?;
        let StepDetails::Console { executable } = &step.details else {
            return Err(StepError::VariantMismatch {
                processor: self.kind(),
                step: step.kind(),
            });
        };

        let program = resolve_program(ctx, step.order, &substitute_path(executable, env));
        let invocation = Invocation::new(program, ctx.step_dir(step.order))
            .args(long_arguments(&step.parameters, env))
            .timeout(self.timeout);

        info!(step = step.order, command = %invocation.command_line(), "running console step");
        section.info(format!("running {}", invocation.command_line()))?;
        let output = self.executor.run(&invocation).await?;
        record_output(section, &output)
    }
}
