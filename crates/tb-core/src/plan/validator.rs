use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};

use super::types::TestPlan;
use crate::types::{StepDetails, StepKind, TestStep};

pub fn validate_plan(plan: &TestPlan) -> Result<()> {
    if plan.name.trim().is_empty() {
        bail!("plan has no name");
    }
    if plan.steps.is_empty() {
        bail!("plan '{}' has no steps", plan.name);
    }
    validate_steps(&plan.steps)
}

/// Structural checks on a step list: positive, unique orders and non-empty
/// variant fields. Unsupported kinds pass; the worker's dispatch table
/// decides what it can run.
pub fn validate_steps(steps: &[TestStep]) -> Result<()> {
    if steps.is_empty() {
        bail!("no steps to execute");
    }
    let mut seen = HashSet::new();
    for step in steps {
        if step.order == 0 {
            bail!("step order must be positive");
        }
        if !seen.insert(step.order) {
            bail!("duplicate step order {}", step.order);
        }
        match &step.details {
            StepDetails::Console { executable } => require_path(step.order, "executable", executable)?,
            StepDetails::Installer { installer } => require_path(step.order, "installer", installer)?,
            StepDetails::Script { script, .. } => require_path(step.order, "script", script)?,
            StepDetails::FileCopy { source, destination } => {
                require_path(step.order, "source", source)?;
                require_path(step.order, "destination", destination)?;
            }
            StepDetails::Unsupported { .. } => {}
        }
        if step.parameters.keys().any(|k| k.trim().is_empty()) {
            bail!("step {} has a parameter with an empty name", step.order);
        }
    }
    Ok(())
}

/// Orders of steps whose kind this build cannot run.
pub fn unsupported_steps(plan: &TestPlan) -> Vec<u32> {
    plan.steps
        .iter()
        .filter(|s| s.kind() == StepKind::Unsupported)
        .map(|s| s.order)
        .collect()
}

fn require_path(order: u32, field: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("step {order}: '{field}' must not be empty");
    }
    Ok(())
}
