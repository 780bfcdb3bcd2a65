//! Step processors, one per [`StepKind`], plus the helpers they share.

pub mod console;
pub mod file_copy;
pub mod installer;
pub mod script;
pub mod tools;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tb_core::{
    EnvironmentParameters, ReportSection, StepKind, StepParameters, TestExecutionState, TestStep,
};

use crate::context::StepContext;
use crate::error::{Result, StepError};
use crate::executor::{ProcessOutput, ProcessStatus};

pub use tools::ToolConfig;

/// Executes steps of one kind.
///
/// The sequencer owns `section`: it creates it before the call and
/// finalizes it afterwards, so processors only add entries.
#[async_trait]
pub trait StepProcessor: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn process(
        &self,
        step: &TestStep,
        env: &EnvironmentParameters,
        ctx: &StepContext,
        section: &mut ReportSection,
    ) -> Result<TestExecutionState>;

    /// Processors that can undo their effects expose it here. Only called
    /// during rollback, at most once per executed step.
    fn as_cleanup(&self) -> Option<&dyn StepCleanup> {
        None
    }
}

#[async_trait]
pub trait StepCleanup: Send + Sync {
    async fn cleanup(
        &self,
        step: &TestStep,
        env: &EnvironmentParameters,
        ctx: &StepContext,
    ) -> Result<()>;
}

pub(crate) fn ensure_kind(expected: StepKind, step: &TestStep) -> Result<()> {
    if step.kind() == expected {
        Ok(())
    } else {
        Err(StepError::VariantMismatch {
            processor: expected,
            step: step.kind(),
        })
    }
}

/// Expand `${name}` references from the environment parameters. Unknown
/// names are left as written.
pub fn substitute(value: &str, env: &EnvironmentParameters) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env.get(name) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn substitute_path(path: &Path, env: &EnvironmentParameters) -> PathBuf {
    PathBuf::from(substitute(&path.to_string_lossy(), env))
}

/// `--key=value` per parameter, `--key` for an empty value.
pub fn long_arguments(parameters: &StepParameters, env: &EnvironmentParameters) -> Vec<String> {
    parameters
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                format!("--{k}")
            } else {
                format!("--{k}={}", substitute(v, env))
            }
        })
        .collect()
}

/// `-key value` per parameter, `-key` alone for an empty value.
pub fn dash_arguments(parameters: &StepParameters, env: &EnvironmentParameters) -> Vec<String> {
    let mut args = Vec::with_capacity(parameters.len() * 2);
    for (k, v) in parameters {
        args.push(format!("-{k}"));
        if !v.is_empty() {
            args.push(substitute(v, env));
        }
    }
    args
}

/// Write the process result into `section` and map it to a step state.
pub(crate) fn record_output(section: &mut ReportSection, output: &ProcessOutput) -> Result<TestExecutionState> {
    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
        section.info(line)?;
    }
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        section.warning(line)?;
    }
    let elapsed = output.duration.as_millis();
    let state = match output.status {
        ProcessStatus::Exited(0) => {
            section.info(format!("process exited with code 0 after {elapsed} ms"))?;
            TestExecutionState::Passed
        }
        ProcessStatus::Exited(code) => {
            section.error(format!("process exited with code {code} after {elapsed} ms"))?;
            TestExecutionState::Failed
        }
        ProcessStatus::Killed => {
            section.error(format!("process was killed after {elapsed} ms"))?;
            TestExecutionState::Failed
        }
        ProcessStatus::TimedOut => {
            section.error(format!("process timed out after {elapsed} ms"))?;
            TestExecutionState::Failed
        }
    };
    Ok(state)
}
