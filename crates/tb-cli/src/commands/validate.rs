use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use tb_core::plan::{parse_plan_file, unsupported_steps, validate_plan};

pub fn run(plan_path: PathBuf) -> Result<()> {
    let plan = parse_plan_file(&plan_path)?;
    validate_plan(&plan)?;

    println!(
        "{} plan '{}' with {} step(s)",
        "valid".green().bold(),
        plan.name,
        plan.steps.len()
    );
    for step in &plan.steps {
        println!(
            "  {:>3}  {:<14} {}",
            step.order,
            step.kind().to_string(),
            step.failure_mode.to_string()
        );
    }

    let unsupported = unsupported_steps(&plan);
    if !unsupported.is_empty() {
        let orders: Vec<String> = unsupported.iter().map(u32::to_string).collect();
        println!(
            "{} step(s) {} have a kind this build cannot run; the worker will fail on them",
            "warning:".yellow().bold(),
            orders.join(", ")
        );
    }
    Ok(())
}
