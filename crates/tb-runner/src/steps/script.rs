use std::sync::Arc;

use async_trait::async_trait;
use tb_core::{
    EnvironmentParameters, ReportSection, ScriptLanguage, StepDetails, StepKind, TestExecutionState,
    TestStep,
};
use tracing::info;

use super::{
    dash_arguments, ensure_kind, long_arguments, record_output, substitute_path, StepProcessor,
    ToolConfig,
};
use crate::context::StepContext;
use crate::error::{Result, StepError};
use crate::executor::{Executor, Invocation};

/// Runs a script through the interpreter for its language.
pub struct ScriptProcessor {
    executor: Arc<dyn Executor>,
    tools: ToolConfig,
}

impl ScriptProcessor {
    pub fn new(executor: Arc<dyn Executor>, tools: ToolConfig) -> Self {
        Self { executor, tools }
    }
}

#[async_trait]
impl StepProcessor for ScriptProcessor {
    fn kind(&self) -> StepKind {
        StepKind::Script
    }

    async fn process(
        &self,
        step: &TestStep,
        env: &EnvironmentParameters,
        ctx: &StepContext,
        section: &mut ReportSection,
    ) -> Result<TestExecutionState> {
        ensure_kind(self.kind(), step)?;
        let StepDetails::Script { language, script } = &step.details else {
            return Err(StepError::VariantMismatch {
                processor: self.kind(),
                step: step.kind(),
            });
        };

        let script = ctx.resolve(step.order, &substitute_path(script, env));
        if !script.exists() {
            return Err(StepError::MissingInput(script));
        }

        let (interpreter, leading) = self.tools.interpreter(*language);
        let parameters = match language {
            ScriptLanguage::PowerShell => dash_arguments(&step.parameters, env),
            ScriptLanguage::Shell | ScriptLanguage::Python => long_arguments(&step.parameters, env),
        };
        let invocation = Invocation::new(interpreter, ctx.step_dir(step.order))
            .args(leading)
            .args([script.display().to_string()])
            .args(parameters)
            .timeout(self.tools.timeout);

        info!(step = step.order, language = %language, script = %script.display(), "running script");
        section.info(format!("running {}", invocation.command_line()))?;
        let output = self.executor.run(&invocation).await?;
        record_output(section, &output)
    }
}
