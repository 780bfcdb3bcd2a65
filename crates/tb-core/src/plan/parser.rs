use std::path::Path;

use anyhow::{Context, Result};

use super::types::*;
use crate::types::{FailureMode, ScriptLanguage, StepDetails, TestStep};

pub fn parse_plan_file(path: &Path) -> Result<TestPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file: {}", path.display()))?;
    parse_plan_str(&content)
}

pub fn parse_plan_str(content: &str) -> Result<TestPlan> {
    let file: PlanFile = toml::from_str(content).context("failed to parse plan TOML")?;
    let steps = file
        .step
        .into_iter()
        .map(resolve_step)
        .collect::<Result<Vec<_>>>()?;
    Ok(TestPlan {
        name: file.plan.name,
        environment: file.environment,
        steps,
    })
}

fn resolve_step(sc: StepConfig) -> Result<TestStep> {
    let order = sc.order;
    let details = match sc.kind.as_str() {
        "console" => StepDetails::Console {
            executable: sc
                .executable
                .with_context(|| format!("console step {order} must have 'executable'"))?,
        },
        "installer" => StepDetails::Installer {
            installer: sc
                .installer
                .with_context(|| format!("installer step {order} must have 'installer'"))?,
        },
        "script" => {
            let language: ScriptLanguage = sc
                .language
                .with_context(|| format!("script step {order} must have 'language'"))?
                .parse()
                .map_err(anyhow::Error::msg)?;
            StepDetails::Script {
                language,
                script: sc
                    .script
                    .with_context(|| format!("script step {order} must have 'script'"))?,
            }
        }
        "file-copy" | "file_copy" => StepDetails::FileCopy {
            source: sc
                .source
                .with_context(|| format!("file-copy step {order} must have 'source'"))?,
            destination: sc
                .destination
                .with_context(|| format!("file-copy step {order} must have 'destination'"))?,
        },
        // Left for the worker's dispatch table to reject, so the run
        // reports it like any other unresolvable step.
        other => StepDetails::Unsupported {
            name: other.to_string(),
        },
    };
    let failure_mode = match sc.failure_mode.as_deref() {
        Some(mode) => mode.parse::<FailureMode>().map_err(anyhow::Error::msg)?,
        None => FailureMode::default(),
    };
    Ok(TestStep {
        order,
        failure_mode,
        parameters: sc.parameters,
        report_files: sc.report_files,
        report_directories: sc.report_directories,
        report_includes_system_log: sc.report_includes_system_log,
        details,
    })
}
