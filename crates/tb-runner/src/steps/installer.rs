use std::sync::Arc;

use async_trait::async_trait;
use tb_core::{EnvironmentParameters, ReportSection, StepDetails, StepKind, TestExecutionState, TestStep};
use tracing::{info, warn};

use super::{ensure_kind, long_arguments, record_output, substitute_path, StepCleanup, StepProcessor, ToolConfig};
use crate::context::StepContext;
use crate::error::{Result, StepError};
use crate::executor::{Executor, Invocation, ProcessStatus};

/// Installs a package with the configured installer tool. Rollback
/// uninstalls it again.
pub struct InstallerProcessor {
    executor: Arc<dyn Executor>,
    tools: ToolConfig,
}

impl InstallerProcessor {
    pub fn new(executor: Arc<dyn Executor>, tools: ToolConfig) -> Self {
        Self { executor, tools }
    }

    fn package(&self, step: &TestStep, env: &EnvironmentParameters, ctx: &StepContext) -> Result<std::path::PathBuf> {
        let StepDetails::Installer { installer } = &step.details else {
            return Err(StepError::VariantMismatch {
                processor: StepKind::Installer,
                step: step.kind(),
            });
        };
        let package = ctx.resolve(step.order, &substitute_path(installer, env));
        if !package.exists() {
            return Err(StepError::MissingInput(package));
        }
        Ok(package)
    }
}

#[async_trait]
impl StepProcessor for InstallerProcessor {
    fn kind(&self) -> StepKind {
        StepKind::Installer
    }

    async fn process(
        &self,
        step: &TestStep,
        env: &EnvironmentParameters,
        ctx: &StepContext,
        section: &mut ReportSection,
    ) -> Result<TestExecutionState> {
        ensure_kind(self.kind(), step)?;
        let package = self.package(step, env, ctx)?;

        let invocation = Invocation::new(&self.tools.installer, ctx.step_dir(step.order))
            .args(ToolConfig::expand(&self.tools.install_args, &package))
            .args(long_arguments(&step.parameters, env))
            .timeout(self.tools.timeout);

        info!(step = step.order, package = %package.display(), "installing package");
        section.info(format!("installing {}", package.display()))?;
        let output = self.executor.run(&invocation).await?;
        record_output(section, &output)
    }

    fn as_cleanup(&self) -> Option<&dyn StepCleanup> {
        Some(self)
    }
}

#[async_trait]
impl StepCleanup for InstallerProcessor {
    async fn cleanup(&self, step: &TestStep, env: &EnvironmentParameters, ctx: &StepContext) -> Result<()> {
        let package = self.package(step, env, ctx)?;
        let invocation = Invocation::new(&self.tools.installer, ctx.step_dir(step.order))
            .args(ToolConfig::expand(&self.tools.uninstall_args, &package))
            .timeout(self.tools.timeout);

        info!(step = step.order, package = %package.display(), "uninstalling package");
        let output = self.executor.run(&invocation).await?;
        match output.status {
            ProcessStatus::Exited(0) => Ok(()),
            status => {
                warn!(step = step.order, ?status, stderr = %output.stderr.trim(), "uninstall failed");
                Err(StepError::Execution(format!(
                    "uninstall of {} ended with {status:?}",
                    package.display()
                )))
            }
        }
    }
}
